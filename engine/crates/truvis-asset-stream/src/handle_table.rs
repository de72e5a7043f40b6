use crate::error::HandleError;
use crate::handle::AssetHandle;
use slotmap::{Key, SlotMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Live,
    /// 已经 free，等待延迟销毁队列回收
    PendingDestroy,
}

struct AssetSlot<T> {
    value: T,
    is_loaded: bool,
    state: SlotState,
    /// 还没有完成的加载任务数
    pending_loads: u32,
}

struct TableInner<K: Key, T> {
    slots: SlotMap<K, AssetSlot<T>>,
    live_count: usize,
}

/// 通过句柄访问的资源表
///
/// 空闲 slot 由 SlotMap 复用，每次复用都会增加代数，旧句柄因此可以被检测出来。
/// 读操作持有共享锁，修改持有独占锁；除了 `drain_all` 以外临界区都是 O(1)。
///
/// slot 的生命周期：`create` -> Live -> `free` -> PendingDestroy -> `reclaim` -> 空闲
pub struct HandleTable<K: Key, T> {
    name: &'static str,
    inner: RwLock<TableInner<K, T>>,
}

// new & init
impl<K, T> HandleTable<K, T>
where
    K: Key + Into<AssetHandle>,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(TableInner {
                slots: SlotMap::with_key(),
                live_count: 0,
            }),
        }
    }

    #[inline]
    fn read_inner(&self) -> RwLockReadGuard<'_, TableInner<K, T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn write_inner(&self) -> RwLockWriteGuard<'_, TableInner<K, T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// create & free
impl<K, T> HandleTable<K, T>
where
    K: Key + Into<AssetHandle>,
    T: Default,
{
    /// 分配一个 slot，value 初始化为 `T::default()`
    pub fn create(&self) -> K {
        let mut inner = self.write_inner();
        inner.live_count += 1;
        inner.slots.insert(AssetSlot {
            value: T::default(),
            is_loaded: false,
            state: SlotState::Live,
            pending_loads: 0,
        })
    }
}
impl<K, T> HandleTable<K, T>
where
    K: Key + Into<AssetHandle>,
{
    /// 标记为 PendingDestroy；物理回收由 `reclaim` 完成
    pub fn free(&self, handle: K) -> Result<(), HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        let mut inner = self.write_inner();
        let slot = inner.slots.get_mut(handle).ok_or(HandleError::Stale(handle.into()))?;
        match slot.state {
            SlotState::PendingDestroy => Err(HandleError::AlreadyFreed(handle.into())),
            SlotState::Live => {
                slot.state = SlotState::PendingDestroy;
                inner.live_count -= 1;
                Ok(())
            }
        }
    }

    /// 删除一个 PendingDestroy 的 slot，返回其中的值
    pub fn reclaim(&self, handle: K) -> Result<T, HandleError> {
        let mut inner = self.write_inner();
        let slot = inner.slots.get(handle).ok_or(HandleError::Stale(handle.into()))?;
        if slot.state == SlotState::Live {
            return Err(HandleError::NotFreed(handle.into()));
        }
        if slot.pending_loads > 0 {
            return Err(HandleError::Busy(handle.into()));
        }
        let slot = inner.slots.remove(handle).ok_or(HandleError::Stale(handle.into()))?;
        Ok(slot.value)
    }

    /// 只在关闭时使用：清空所有 slot，不管状态
    pub fn drain_all(&self) -> Vec<(K, T)> {
        let _span = tracy_client::span!("HandleTable::drain_all");
        let mut inner = self.write_inner();
        inner.live_count = 0;
        inner.slots.drain().map(|(handle, slot)| (handle, slot.value)).collect()
    }
}

// access
impl<K, T> HandleTable<K, T>
where
    K: Key + Into<AssetHandle>,
{
    /// 渲染线程使用的查询接口
    ///
    /// - 空句柄、已经 free 的句柄返回 None
    /// - 非空但无法解析的句柄（代数不匹配）是调用者的逻辑错误，直接 panic
    ///
    /// `f` 在持有读锁时执行，不能在里面修改同一张表。
    pub fn lookup<R>(&self, handle: K, f: impl FnOnce(&T) -> R) -> Option<R> {
        if handle.is_null() {
            return None;
        }
        let inner = self.read_inner();
        let Some(slot) = inner.slots.get(handle) else {
            panic!("{}: handle {:?} does not resolve, it was recycled or belongs to another table", self.name, handle);
        };
        match slot.state {
            SlotState::Live => Some(f(&slot.value)),
            SlotState::PendingDestroy => {
                log::warn!("{}: lookup of released handle {:?}", self.name, handle);
                None
            }
        }
    }

    /// 可失败的只读访问，加载任务和回调使用
    pub fn read<R>(&self, handle: K, f: impl FnOnce(&T) -> R) -> Result<R, HandleError> {
        let inner = self.read_inner();
        let slot = Self::live_slot(&inner.slots, handle)?;
        Ok(f(&slot.value))
    }

    pub fn write<R>(&self, handle: K, f: impl FnOnce(&mut T) -> R) -> Result<R, HandleError> {
        let mut inner = self.write_inner();
        Self::live_slot(&inner.slots, handle)?;
        let slot = inner.slots.get_mut(handle).ok_or(HandleError::Stale(handle.into()))?;
        Ok(f(&mut slot.value))
    }

    fn live_slot(slots: &SlotMap<K, AssetSlot<T>>, handle: K) -> Result<&AssetSlot<T>, HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        let slot = slots.get(handle).ok_or(HandleError::Stale(handle.into()))?;
        match slot.state {
            SlotState::Live => Ok(slot),
            SlotState::PendingDestroy => Err(HandleError::AlreadyFreed(handle.into())),
        }
    }
}

// load tracking
impl<K, T> HandleTable<K, T>
where
    K: Key + Into<AssetHandle>,
{
    /// 有一个加载任务开始使用这个 slot
    pub fn begin_load(&self, handle: K) -> Result<(), HandleError> {
        let mut inner = self.write_inner();
        Self::live_slot(&inner.slots, handle)?;
        if let Some(slot) = inner.slots.get_mut(handle) {
            slot.pending_loads += 1;
        }
        Ok(())
    }

    /// 加载任务结束
    ///
    /// 返回 slot 是否被标记为已加载：加载期间被 free 的 slot 不会被标记。
    pub fn finish_load(&self, handle: K, success: bool) -> Result<bool, HandleError> {
        let mut inner = self.write_inner();
        let slot = inner.slots.get_mut(handle).ok_or(HandleError::Stale(handle.into()))?;
        slot.pending_loads = slot.pending_loads.saturating_sub(1);
        match slot.state {
            SlotState::Live if success => {
                slot.is_loaded = true;
                Ok(true)
            }
            SlotState::Live => Ok(false),
            SlotState::PendingDestroy => {
                log::debug!("{}: load finished on released handle {:?}", self.name, handle);
                Ok(false)
            }
        }
    }
}

// getters
impl<K, T> HandleTable<K, T>
where
    K: Key + Into<AssetHandle>,
{
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 只有 Live 且加载完成的 slot 返回 true
    pub fn is_loaded(&self, handle: K) -> bool {
        let inner = self.read_inner();
        inner.slots.get(handle).is_some_and(|slot| slot.state == SlotState::Live && slot.is_loaded)
    }

    pub fn state(&self, handle: K) -> Option<SlotState> {
        self.read_inner().slots.get(handle).map(|slot| slot.state)
    }

    pub fn pending_loads(&self, handle: K) -> u32 {
        self.read_inner().slots.get(handle).map_or(0, |slot| slot.pending_loads)
    }

    /// Live 状态的 slot 数
    #[inline]
    pub fn live_count(&self) -> usize {
        self.read_inner().live_count
    }

    /// 被占用的 slot 数，包括等待回收的
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.read_inner().slots.len()
    }
}
