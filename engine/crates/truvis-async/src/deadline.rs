use std::time::{Duration, Instant};

/// 阻塞等待的截止时间
///
/// 所有可能阻塞的操作（出队、线程 join）都显式接收一个 Deadline，
/// `Forever` 表示一直等待。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    Forever,
    At(Instant),
}

impl Deadline {
    /// 从现在开始，最多等待 `timeout`
    #[inline]
    pub fn after(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(instant) => Self::At(instant),
            None => Self::Forever,
        }
    }

    /// `None` 表示一直等待
    #[inline]
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(Self::Forever, Self::after)
    }

    #[inline]
    pub fn instant(&self) -> Option<Instant> {
        match self {
            Self::Forever => None,
            Self::At(instant) => Some(*instant),
        }
    }

    #[inline]
    pub fn has_expired(&self) -> bool {
        self.instant().is_some_and(|instant| Instant::now() >= instant)
    }
}
