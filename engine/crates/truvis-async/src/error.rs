use std::fmt;

/// 入队失败，失败时把 item 交还给调用者
#[derive(thiserror::Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// 队列已经关闭
    #[error("pushing into a closed channel")]
    Closed(T),
    /// 队列已满（只有非阻塞入队会返回）
    #[error("pushing into a full channel")]
    Full(T),
    /// 等待空位超时
    #[error("timed out waiting for a free slot")]
    Timeout(T),
}

impl<T> PushError<T> {
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(item) | Self::Full(item) | Self::Timeout(item) => item,
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => f.write_str("Closed(..)"),
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Timeout(_) => f.write_str("Timeout(..)"),
        }
    }
}

/// 出队失败
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// 队列已关闭且已经取空
    #[error("channel is closed and drained")]
    Closed,
    #[error("timed out waiting for an item")]
    Timeout,
}

/// 线程池相关的错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool '{0}' is shut down")]
    ShutDown(String),
    #[error("job queue of worker pool '{0}' is full")]
    QueueFull(String),
    #[error("worker pool '{pool}' failed to join workers {unjoined:?} before the deadline")]
    ShutdownTimeout { pool: String, unjoined: Vec<usize> },
    #[error("worker pool '{pool}' had panicked workers {panicked:?}")]
    WorkerPanicked { pool: String, panicked: Vec<usize> },
}
