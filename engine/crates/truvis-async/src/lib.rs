//! 后台任务调度的基础设施：有界多生产者多消费者队列，以及从队列中取任务执行的固定线程池。

pub mod bounded_channel;
pub mod deadline;
pub mod error;
pub mod worker_pool;

pub use bounded_channel::BoundedChannel;
pub use deadline::Deadline;
pub use error::{PoolError, PopError, PushError};
pub use worker_pool::{JobSender, WorkItem, WorkerContext, WorkerPool};
