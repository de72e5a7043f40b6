use crate::asset_store::AssetStore;
use crate::device::GpuDevice;
use crate::handle::AssetHandle;
use anyhow::Context;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use truvis_async::WorkerContext;

pub type LoadFn<D> = Box<dyn FnOnce(&mut RecordContext<'_, D>) -> anyhow::Result<()> + Send>;
pub type DoneFn = Box<dyn FnOnce(&[AssetHandle]) + Send>;

/// 一个加载任务
///
/// `load` 在 worker 线程上执行，负责把数据录制进 command batch，并填充句柄对应的资源；
/// `done` 在拥有 `AssetManager` 的线程上执行，此时 GPU 已经完成上传。
pub struct LoadRequest<D: GpuDevice> {
    pub(crate) label: String,
    pub(crate) handles: Vec<AssetHandle>,
    pub(crate) load: LoadFn<D>,
    pub(crate) done: Option<DoneFn>,
}
impl<D: GpuDevice> LoadRequest<D> {
    pub fn new<F>(label: impl Into<String>, handles: Vec<AssetHandle>, load: F) -> Self
    where
        F: FnOnce(&mut RecordContext<'_, D>) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            handles,
            load: Box::new(load),
            done: None,
        }
    }

    pub fn on_done<F>(mut self, done: F) -> Self
    where
        F: FnOnce(&[AssetHandle]) + Send + 'static,
    {
        self.done = Some(Box::new(done));
        self
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
    #[inline]
    pub fn handles(&self) -> &[AssetHandle] {
        &self.handles
    }
}

/// `load` 闭包能访问到的东西
pub struct RecordContext<'a, D: GpuDevice> {
    worker_id: usize,
    device: &'a D,
    batch: &'a mut D::CommandBatch,
    handles: &'a [AssetHandle],
    store: &'a AssetStore<D>,
}
impl<D: GpuDevice> RecordContext<'_, D> {
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
    #[inline]
    pub fn device(&self) -> &D {
        self.device
    }
    #[inline]
    pub fn batch(&mut self) -> &mut D::CommandBatch {
        self.batch
    }
    #[inline]
    pub fn handles(&self) -> &[AssetHandle] {
        self.handles
    }
    #[inline]
    pub fn store(&self) -> &AssetStore<D> {
        self.store
    }
}

/// 已经提交到设备、等待完成的加载
pub(crate) struct PendingCompletion<D: GpuDevice> {
    pub label: String,
    pub batch: D::CommandBatch,
    pub token: D::Token,
    pub handles: Vec<AssetHandle>,
    pub done: Option<DoneFn>,
    pub worker_id: usize,
}

/// 在 worker 上录制或提交失败的加载
pub(crate) struct FailedLoad {
    pub label: String,
    pub handles: Vec<AssetHandle>,
    pub worker_id: usize,
    pub error: anyhow::Error,
}

/// worker -> 拥有者线程 的消息
pub(crate) enum Completion<D: GpuDevice> {
    Submitted(PendingCompletion<D>),
    Failed(FailedLoad),
}

/// 每个 worker 一个 recorder，各自有一把锁
///
/// worker 录制时持有自己的锁；拥有者线程回收 batch 时也要拿同一把锁。
pub(crate) struct WorkerRecorders<D: GpuDevice> {
    recorders: Vec<Mutex<Option<D::Recorder>>>,
}
// new & init
impl<D: GpuDevice> WorkerRecorders<D> {
    pub fn new(device: &D, worker_count: usize) -> anyhow::Result<Self> {
        let mut recorders = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            match device.create_recorder(worker_id) {
                Ok(recorder) => recorders.push(Mutex::new(Some(recorder))),
                Err(e) => {
                    for slot in recorders {
                        if let Some(recorder) = slot.into_inner().unwrap_or_else(PoisonError::into_inner) {
                            device.destroy_recorder(recorder);
                        }
                    }
                    return Err(e).with_context(|| format!("Failed to create recorder for worker {worker_id}"));
                }
            }
        }
        Ok(Self { recorders })
    }
}
// tools
impl<D: GpuDevice> WorkerRecorders<D> {
    #[inline]
    pub fn lock(&self, worker_id: usize) -> MutexGuard<'_, Option<D::Recorder>> {
        self.recorders[worker_id].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 把 batch 还给录制它的 worker
    pub fn release_batch(&self, device: &D, worker_id: usize, batch: D::CommandBatch) {
        match self.lock(worker_id).as_mut() {
            Some(recorder) => device.release_batch(recorder, batch),
            None => log::warn!("Recorder of worker {} is already destroyed, dropping its batch", worker_id),
        }
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.recorders.len()
    }
}
// destroy
impl<D: GpuDevice> WorkerRecorders<D> {
    pub fn destroy_all(&self, device: &D) {
        for worker_id in 0..self.recorders.len() {
            if let Some(recorder) = self.lock(worker_id).take() {
                device.destroy_recorder(recorder);
            }
        }
    }
}

/// 投递到线程池的加载任务
///
/// 没有被执行就被 drop 时（提交失败，或者线程池关闭时丢弃），结束句柄上的加载。
pub(crate) struct LoadJob<D: GpuDevice> {
    store: AssetStore<D>,
    request: Option<LoadRequest<D>>,
}
impl<D: GpuDevice> LoadJob<D> {
    pub fn new(store: AssetStore<D>, request: LoadRequest<D>) -> Self {
        Self {
            store,
            request: Some(request),
        }
    }

    pub fn run(mut self, worker: &WorkerContext) {
        if let Some(request) = self.request.take() {
            run_load_job(&self.store, worker, request);
        }
    }
}
impl<D: GpuDevice> Drop for LoadJob<D> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            log::warn!("Load '{}' was dropped before it ran", request.label);
            self.store.finish_loads(&request.handles, false);
        }
    }
}

/// worker 上执行一个加载任务
///
/// 1. 锁住 worker 自己的 recorder
/// 2. begin -> load -> end -> submit
/// 3. 解锁，把结果推进完成队列（队列满时阻塞）
///
/// 任何一步失败（包括 `load` 闭包 panic）都会回收 batch，并把失败推给拥有者线程，由它报告错误；这里不做重试。
fn run_load_job<D: GpuDevice>(store: &AssetStore<D>, worker: &WorkerContext, request: LoadRequest<D>) {
    let _span = tracy_client::span!("LoadingPipeline::run");

    let LoadRequest {
        label,
        handles,
        load,
        done,
    } = request;
    let worker_id = worker.worker_id();
    let device = store.device().as_ref();
    let shared = store.shared();

    let recorded = {
        let mut recorder = shared.recorders.lock(worker_id);
        match recorder.as_mut() {
            Some(recorder) => record_and_submit(store, device, recorder, worker_id, &handles, load),
            None => Err(anyhow::anyhow!("recorder of worker {worker_id} has been destroyed")),
        }
    };

    let completion = match recorded {
        Ok((batch, token)) => {
            log::debug!("Worker {} submitted load '{}'", worker_id, label);
            Completion::Submitted(PendingCompletion {
                label,
                batch,
                token,
                handles,
                done,
                worker_id,
            })
        }
        Err(error) => {
            log::error!("Worker {} failed to record load '{}': {:#}", worker_id, label, error);
            Completion::Failed(FailedLoad {
                label,
                handles,
                worker_id,
                error,
            })
        }
    };

    if shared.completions.push(completion).is_err() {
        log::error!("Completion channel is closed, dropping the result of worker {}", worker_id);
    }
}

fn record_and_submit<D: GpuDevice>(
    store: &AssetStore<D>,
    device: &D,
    recorder: &mut D::Recorder,
    worker_id: usize,
    handles: &[AssetHandle],
    load: LoadFn<D>,
) -> anyhow::Result<(D::CommandBatch, D::Token)> {
    let mut batch = device.begin_batch(recorder).context("begin_batch failed")?;
    // panic 不能越过 worker 的循环，否则 worker 线程退出，句柄上的加载也永远不会结束
    let recorded = panic::catch_unwind(AssertUnwindSafe(|| {
        record(store, device, recorder, &mut batch, worker_id, handles, load)
    }))
    .unwrap_or_else(|payload| Err(anyhow::anyhow!("load job panicked: {}", panic_message(payload.as_ref()))));
    match recorded {
        Ok(token) => Ok((batch, token)),
        Err(e) => {
            device.release_batch(recorder, batch);
            Err(e)
        }
    }
}

fn record<D: GpuDevice>(
    store: &AssetStore<D>,
    device: &D,
    recorder: &mut D::Recorder,
    batch: &mut D::CommandBatch,
    worker_id: usize,
    handles: &[AssetHandle],
    load: LoadFn<D>,
) -> anyhow::Result<D::Token> {
    {
        let mut ctx = RecordContext {
            worker_id,
            device,
            batch: &mut *batch,
            handles,
            store,
        };
        load(&mut ctx).context("load job failed")?;
    }
    device.end_batch(recorder, batch).context("end_batch failed")?;
    device.submit_batch(batch).context("submit_batch failed")
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
