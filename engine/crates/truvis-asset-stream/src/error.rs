use crate::handle::AssetHandle;
use truvis_async::PoolError;

/// 句柄访问失败
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("null handle")]
    Null,
    /// 代数不匹配：slot 已经被回收（并可能已经被复用）
    #[error("stale handle {0:?}")]
    Stale(AssetHandle),
    #[error("handle {0:?} has already been freed")]
    AlreadyFreed(AssetHandle),
    /// 还有加载任务在使用这个 slot
    #[error("handle {0:?} still has loads in flight")]
    Busy(AssetHandle),
    /// 对一个还是 Live 的 slot 执行了 reclaim
    #[error("handle {0:?} has not been freed")]
    NotFreed(AssetHandle),
}

/// 流式加载子系统的错误
///
/// `DeviceFailure` 和 `LoadFailed` 表示子系统已经不可恢复。
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("device reported a failed submission from worker {worker_id} for {handles:?}")]
    DeviceFailure { handles: Vec<AssetHandle>, worker_id: usize },

    #[error("load job '{label}' on worker {worker_id} failed for {handles:?}")]
    LoadFailed {
        label: String,
        handles: Vec<AssetHandle>,
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("bindless texture array is exhausted ({max} slots)")]
    BindlessExhausted { max: u32 },
}
