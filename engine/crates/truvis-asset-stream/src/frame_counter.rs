use std::sync::atomic::{AtomicU64, Ordering};

/// 帧计数器
///
/// `next_frame` 只由拥有 `AssetManager` 的线程调用；其他线程（例如在 worker 上 free 句柄）只读取。
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: AtomicU64,
    frames_in_flight: u64,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64, frames_in_flight: u64) -> Self {
        Self {
            frame_id: AtomicU64::new(init_frame_id),
            frames_in_flight,
        }
    }
}
// update
impl FrameCounter {
    /// 返回新的帧序号
    #[inline]
    pub fn next_frame(&self) -> u64 {
        self.frame_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }
    #[inline]
    pub fn frames_in_flight(&self) -> u64 {
        self.frames_in_flight
    }
    #[inline]
    pub fn frame_label(&self) -> u64 {
        self.frame_id() % self.frames_in_flight.max(1)
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}#{}]", self.frame_id(), self.frame_label())
    }
}
