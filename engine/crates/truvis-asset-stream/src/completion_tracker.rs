use crate::asset_store::AssetStore;
use crate::device::{GpuDevice, PollResult};
use crate::error::StreamError;
use crate::loading_pipeline::{Completion, PendingCompletion};

/// 一次 `CompletionTracker::update` 的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// 从完成队列取出的条目数
    pub drained: usize,
    /// GPU 已经完成、调用过回调的加载数
    pub finalized: usize,
    /// 留到下一帧继续轮询的条目数
    pub still_pending: usize,
}

/// 在拥有者线程上，每帧轮询已提交加载的完成状态
///
/// 从不阻塞：token 只用非阻塞的 `poll_token` 查询。
pub struct CompletionTracker<D: GpuDevice> {
    wait_list: Vec<PendingCompletion<D>>,
    /// 每帧最多从完成队列里取出的条目数，避免 worker 持续生产时卡住一帧
    drain_limit: usize,
}
// new & init
impl<D: GpuDevice> CompletionTracker<D> {
    pub fn new(drain_limit: usize) -> Self {
        Self {
            wait_list: Vec::new(),
            drain_limit,
        }
    }
}
// update
impl<D: GpuDevice> CompletionTracker<D> {
    /// # Phase: Before Render
    ///
    /// 1. 从完成队列中取出最多 `drain_limit` 个条目放进等待列表
    /// 2. 每个条目轮询一次：`Pending` 保留；`Done` 回收资源并调用回调；`Error` 移除并返回错误
    ///
    /// 返回错误时，还没处理到的条目保留在等待列表中。
    pub fn update(&mut self, store: &AssetStore<D>) -> Result<CompletionReport, StreamError> {
        let _span = tracy_client::span!("CompletionTracker::update");
        let shared = store.shared();
        let mut report = CompletionReport::default();

        for _ in 0..self.drain_limit {
            let Some(completion) = shared.completions.try_pop() else {
                break;
            };
            report.drained += 1;
            match completion {
                Completion::Submitted(pending) => self.wait_list.push(pending),
                Completion::Failed(failed) => {
                    store.finish_loads(&failed.handles, false);
                    log::error!("Load '{}' failed on worker {}: {:#}", failed.label, failed.worker_id, failed.error);
                    return Err(StreamError::LoadFailed {
                        label: failed.label,
                        handles: failed.handles,
                        worker_id: failed.worker_id,
                        source: failed.error,
                    });
                }
            }
        }

        let device = shared.device.as_ref();
        let mut failure = None;
        for pending in std::mem::take(&mut self.wait_list) {
            if failure.is_some() {
                self.wait_list.push(pending);
                continue;
            }
            match device.poll_token(&pending.token) {
                PollResult::Pending => self.wait_list.push(pending),
                PollResult::Done => {
                    Self::retire(store, pending, true);
                    report.finalized += 1;
                }
                PollResult::Error => {
                    log::error!("Device reported an error for load '{}' from worker {}", pending.label, pending.worker_id);
                    failure = Some(StreamError::DeviceFailure {
                        handles: pending.handles.clone(),
                        worker_id: pending.worker_id,
                    });
                    Self::retire(store, pending, false);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        report.still_pending = self.wait_list.len();
        Ok(report)
    }

    /// 回收 batch 和 token，结束句柄上的加载；成功时调用回调
    fn retire(store: &AssetStore<D>, pending: PendingCompletion<D>, success: bool) {
        let shared = store.shared();
        let PendingCompletion {
            label,
            batch,
            token,
            handles,
            done,
            worker_id,
        } = pending;

        shared.recorders.release_batch(shared.device.as_ref(), worker_id, batch);
        shared.device.destroy_token(token);
        store.finish_loads(&handles, success);

        if success {
            log::debug!("Load '{}' finished", label);
            if let Some(done) = done {
                done(&handles);
            }
        }
    }
}
// getters
impl<D: GpuDevice> CompletionTracker<D> {
    #[inline]
    pub fn wait_list_len(&self) -> usize {
        self.wait_list.len()
    }

    pub fn has_pending_work(&self, store: &AssetStore<D>) -> bool {
        !self.wait_list.is_empty() || !store.shared().completions.is_empty()
    }
}
