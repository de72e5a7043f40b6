use crate::bounded_channel::BoundedChannel;
use crate::deadline::Deadline;
use crate::error::{PoolError, PushError};
use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::CachePadded;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

thread_local! {
    static CURRENT_WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// 执行任务时 worker 的身份
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker_id: usize,
    worker_count: usize,
    pool_name: Arc<str>,
}
impl WorkerContext {
    /// 范围是 `0..worker_count`
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
    #[inline]
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }
}

/// 队列中的一个任务：payload 就是闭包捕获的状态，只会被某个 worker 执行一次
pub type WorkItem = Box<dyn FnOnce(&WorkerContext) + Send + 'static>;

/// 向线程池投递任务的句柄，可以 clone 到任意线程
#[derive(Clone)]
pub struct JobSender {
    jobs: BoundedChannel<WorkItem>,
    /// 已经投递但还没有执行完的任务数（排队中 + 执行中）
    pending: Arc<CachePadded<AtomicUsize>>,
    pool_name: Arc<str>,
}
impl JobSender {
    /// 投递任务；队列满时阻塞（背压）
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.jobs.push(Box::new(job)).map_err(|e| self.rollback(e))
    }

    /// 非阻塞投递；队列满时返回 `PoolError::QueueFull`
    pub fn try_submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.jobs.try_push(Box::new(job)).map_err(|e| self.rollback(e))
    }

    fn rollback(&self, e: PushError<WorkItem>) -> PoolError {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        match e {
            PushError::Full(_) | PushError::Timeout(_) => PoolError::QueueFull(self.pool_name.to_string()),
            PushError::Closed(_) => PoolError::ShutDown(self.pool_name.to_string()),
        }
    }

    #[inline]
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn queued_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// 已经被 worker 取走但还没执行完的任务数（近似值）
    #[inline]
    pub fn running_jobs(&self) -> usize {
        self.pending_jobs().saturating_sub(self.queued_jobs())
    }
}

/// 固定数量的 OS 线程，持续从同一个 BoundedChannel 中取任务执行
///
/// # 线程生命周期
/// - `new` 时启动 `thread_count` 个线程，线程名为 `{name}-{index}`
/// - `shutdown` 关闭任务队列，所有阻塞在出队上的 worker 都会被唤醒；
///   worker 会先执行完队列里剩余的任务再退出
/// - 每个 worker 退出时把自己的 id 发到 exit channel，`shutdown` 据此在 deadline 内 join；
///   超时未退出的 worker 会被报告出来，而不是让进程无声地卡住
pub struct WorkerPool {
    name: Arc<str>,
    sender: JobSender,

    workers: Vec<Option<JoinHandle<()>>>,
    exit_receiver: Receiver<usize>,
    /// 还没有退出的 worker 数，worker 因 panic 退出时也会减少
    live_workers: Arc<AtomicUsize>,

    is_shut_down: bool,
}

// new & init
impl WorkerPool {
    pub fn new(name: &str, thread_count: usize, queue_capacity: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(thread_count > 0, "worker pool '{name}' needs at least one thread");
        anyhow::ensure!(queue_capacity > 0, "worker pool '{name}' needs a non-zero queue capacity");

        let name: Arc<str> = Arc::from(name);
        let jobs = BoundedChannel::<WorkItem>::new(queue_capacity);
        let pending = Arc::new(CachePadded::new(AtomicUsize::new(0)));
        let (exit_sender, exit_receiver) = crossbeam_channel::unbounded::<usize>();
        let live_workers = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(thread_count);
        for worker_id in 0..thread_count {
            let ctx = WorkerContext {
                worker_id,
                worker_count: thread_count,
                pool_name: name.clone(),
            };
            let worker_jobs = jobs.clone();
            let worker_pending = pending.clone();
            let exit_notifier = ExitNotifier {
                worker_id,
                pool_name: name.clone(),
                exit_sender: exit_sender.clone(),
                live_workers: live_workers.clone(),
            };

            live_workers.fetch_add(1, Ordering::AcqRel);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || worker_main(ctx, worker_jobs, worker_pending, exit_notifier));
            match spawned {
                Ok(handle) => workers.push(Some(handle)),
                Err(e) => {
                    // 已经启动的线程需要先收回来
                    jobs.close();
                    for handle in workers.into_iter().flatten() {
                        let _ = handle.join();
                    }
                    return Err(e).with_context(|| format!("Failed to spawn worker {worker_id} of pool '{name}'"));
                }
            }
        }

        log::info!("WorkerPool '{}' started: {} threads, queue capacity {}", name, thread_count, queue_capacity);

        Ok(Self {
            name: name.clone(),
            sender: JobSender {
                jobs,
                pending,
                pool_name: name,
            },
            workers,
            exit_receiver,
            live_workers,
            is_shut_down: false,
        })
    }
}

// tools
impl WorkerPool {
    /// 投递任务；队列满时阻塞
    #[inline]
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        self.sender.submit(job)
    }

    #[inline]
    pub fn try_submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        self.sender.try_submit(job)
    }

    /// 当前线程如果是某个线程池的 worker，返回它的 id
    #[inline]
    pub fn current_worker_id() -> Option<usize> {
        CURRENT_WORKER_ID.with(Cell::get)
    }
}

// getters
impl WorkerPool {
    #[inline]
    pub fn sender(&self) -> JobSender {
        self.sender.clone()
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
    /// 排队中 + 执行中的任务数
    #[inline]
    pub fn pending_jobs(&self) -> usize {
        self.sender.pending_jobs()
    }
    #[inline]
    pub fn queued_jobs(&self) -> usize {
        self.sender.queued_jobs()
    }
    #[inline]
    pub fn running_jobs(&self) -> usize {
        self.sender.running_jobs()
    }
    /// 还在运行的 worker 数；为 0 时队列里的任务不会再被执行
    #[inline]
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.pending_jobs() == 0
    }
    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down
    }
}

// destroy
impl WorkerPool {
    /// 关闭任务队列并在 `deadline` 之前 join 所有 worker
    ///
    /// 重复调用直接返回 Ok。
    pub fn shutdown(&mut self, deadline: Deadline) -> Result<(), PoolError> {
        if self.is_shut_down {
            return Ok(());
        }
        self.is_shut_down = true;

        let _span = tracy_client::span!("WorkerPool::shutdown");
        log::info!(
            "WorkerPool '{}' is shutting down, {} jobs still pending...",
            self.name,
            self.sender.pending_jobs()
        );
        self.sender.jobs.close();

        let mut panicked = Vec::new();
        let mut remaining = self.workers.iter().filter(|w| w.is_some()).count();
        while remaining > 0 {
            let exited = match deadline.instant() {
                None => self.exit_receiver.recv().ok(),
                Some(instant) => self.exit_receiver.recv_deadline(instant).ok(),
            };
            let Some(worker_id) = exited else {
                break;
            };
            remaining -= 1;

            if let Some(handle) = self.workers.get_mut(worker_id).and_then(Option::take)
                && handle.join().is_err()
            {
                panicked.push(worker_id);
            }
        }

        let unjoined: Vec<usize> =
            self.workers.iter().enumerate().filter_map(|(worker_id, w)| w.as_ref().map(|_| worker_id)).collect();
        if !unjoined.is_empty() {
            log::error!("WorkerPool '{}': workers {:?} did not exit before the deadline", self.name, unjoined);
            // 超时的线程只能 detach
            self.workers.iter_mut().for_each(|w| drop(w.take()));
            return Err(PoolError::ShutdownTimeout {
                pool: self.name.to_string(),
                unjoined,
            });
        }

        self.discard_orphaned_jobs();

        if !panicked.is_empty() {
            log::error!("WorkerPool '{}': workers {:?} panicked", self.name, panicked);
            return Err(PoolError::WorkerPanicked {
                pool: self.name.to_string(),
                panicked,
            });
        }

        log::info!("WorkerPool '{}' shut down, all workers joined.", self.name);
        Ok(())
    }

    /// 所有 worker 都已经 join，队列里剩下的任务不会再有人执行，直接 drop
    fn discard_orphaned_jobs(&self) {
        let mut discarded = 0;
        while let Some(job) = self.sender.jobs.try_pop() {
            drop(job);
            self.sender.pending.fetch_sub(1, Ordering::AcqRel);
            discarded += 1;
        }
        if discarded > 0 {
            log::warn!("WorkerPool '{}': {} queued jobs were never run", self.name, discarded);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(Deadline::Forever) {
            log::error!("{e}");
        }
    }
}

/// worker 线程退出时（包括 panic 展开）通知线程池
struct ExitNotifier {
    worker_id: usize,
    pool_name: Arc<str>,
    exit_sender: Sender<usize>,
    live_workers: Arc<AtomicUsize>,
}
impl Drop for ExitNotifier {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("Worker {} of pool '{}' panicked while running a job", self.worker_id, self.pool_name);
        }
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
        let _ = self.exit_sender.send(self.worker_id);
    }
}

/// 任务结束时（包括 panic 展开）减少 pending 计数
struct PendingGuard<'a>(&'a AtomicUsize);
impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn worker_main(
    ctx: WorkerContext,
    jobs: BoundedChannel<WorkItem>,
    pending: Arc<CachePadded<AtomicUsize>>,
    exit_notifier: ExitNotifier,
) {
    let _exit_notifier = exit_notifier;
    CURRENT_WORKER_ID.with(|id| id.set(Some(ctx.worker_id)));
    log::debug!("Worker {} of pool '{}' started", ctx.worker_id, ctx.pool_name);

    // 队列关闭并取空之后 pop 返回 Closed，循环结束
    while let Ok(job) = jobs.pop(Deadline::Forever) {
        let _span = tracy_client::span!("WorkerPool::job");
        let _pending_guard = PendingGuard(&pending);
        job(&ctx);
    }

    log::debug!("Worker {} of pool '{}' exiting", ctx.worker_id, ctx.pool_name);
}
