use crate::handle::AssetHandle;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingDeletion {
    pub handle: AssetHandle,
    /// 到达这一帧之后才可以真正销毁
    pub target_frame: u64,
}

/// destroyer 对一个到期条目的处理结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    Destroyed,
    /// 资源仍在被加载任务使用，留到下一帧再试
    Busy,
    /// 句柄已经失效，直接丢弃这个条目
    Skipped,
}

/// 延迟销毁队列
///
/// free 之后的资源可能还被前几帧提交的 GPU 命令引用，所以要等 `frames_in_flight` 帧之后才能销毁。
/// free 可能发生在任意线程，因此内部用 Mutex 保护。
pub struct DeferredDeletionQueue {
    pending: Mutex<VecDeque<PendingDeletion>>,
    frames_in_flight: u64,
}
// new & init
impl DeferredDeletionQueue {
    pub fn new(frames_in_flight: u64) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            frames_in_flight,
        }
    }

    #[inline]
    fn pending(&self) -> MutexGuard<'_, VecDeque<PendingDeletion>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl DeferredDeletionQueue {
    pub fn push_delete(&self, handle: AssetHandle, current_frame: u64) {
        self.pending().push_back(PendingDeletion {
            handle,
            target_frame: current_frame + self.frames_in_flight,
        });
    }

    /// 处理所有 `target_frame <= current_frame` 的条目，返回实际销毁的数量
    ///
    /// `destroy` 在队列锁之外调用，可以安全地调用 `push_delete`。
    pub fn drain_due(&self, current_frame: u64, mut destroy: impl FnMut(AssetHandle) -> DrainOutcome) -> usize {
        let _span = tracy_client::span!("DeferredDeletionQueue::drain_due");

        let mut due = Vec::new();
        self.pending().retain(|entry| {
            if entry.target_frame <= current_frame {
                due.push(*entry);
                false
            } else {
                true
            }
        });

        let mut destroyed = 0;
        let mut busy = Vec::new();
        for entry in due {
            match destroy(entry.handle) {
                DrainOutcome::Destroyed => destroyed += 1,
                DrainOutcome::Busy => busy.push(entry),
                DrainOutcome::Skipped => (),
            }
        }

        // 仍在使用的条目放回队首，保持先后顺序
        if !busy.is_empty() {
            let mut pending = self.pending();
            for entry in busy.into_iter().rev() {
                pending.push_front(entry);
            }
        }

        destroyed
    }

    /// 只在关闭时调用：设备已经 idle，不再检查帧号
    pub fn force_drain_all(&self, mut destroy: impl FnMut(AssetHandle)) -> usize {
        let drained: Vec<PendingDeletion> = self.pending().drain(..).collect();
        let count = drained.len();
        drained.into_iter().for_each(|entry| destroy(entry.handle));
        count
    }
}
// getters
impl DeferredDeletionQueue {
    #[inline]
    pub fn len(&self) -> usize {
        self.pending().len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }
    #[inline]
    pub fn frames_in_flight(&self) -> u64 {
        self.frames_in_flight
    }
}
