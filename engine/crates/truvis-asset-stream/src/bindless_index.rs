use crate::error::StreamError;
use crate::handle::TextureHandle;
use slotmap::SecondaryMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 纹理在 bindless 描述符数组中的下标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindlessTextureIndex(u32);
impl BindlessTextureIndex {
    const INVALID: u32 = u32::MAX;

    #[inline]
    pub fn new(index: u32) -> Self {
        Self(index)
    }
    #[inline]
    pub fn null() -> Self {
        Self(Self::INVALID)
    }
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == Self::INVALID
    }
    #[inline]
    pub fn index(&self) -> u32 {
        self.0
    }
}
impl Default for BindlessTextureIndex {
    fn default() -> Self {
        Self::null()
    }
}

struct AllocatorInner {
    /// 回收的下标，优先复用
    free_indices: Vec<u32>,
    next_index: u32,
    assigned: SecondaryMap<TextureHandle, BindlessTextureIndex>,
}

/// 为每个纹理句柄分配一个稳定的 bindless 下标，纹理真正销毁时归还
pub struct BindlessIndexAllocator {
    inner: Mutex<AllocatorInner>,
    max_indices: u32,
}
// new & init
impl BindlessIndexAllocator {
    pub fn new(max_indices: u32) -> Self {
        Self {
            inner: Mutex::new(AllocatorInner {
                free_indices: Vec::new(),
                next_index: 0,
                assigned: SecondaryMap::new(),
            }),
            max_indices,
        }
    }

    #[inline]
    fn inner(&self) -> MutexGuard<'_, AllocatorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl BindlessIndexAllocator {
    pub fn register(&self, handle: TextureHandle) -> Result<BindlessTextureIndex, StreamError> {
        let mut inner = self.inner();
        if let Some(index) = inner.assigned.get(handle) {
            log::error!("Texture handle {:?} is already registered", handle);
            return Ok(*index);
        }

        let index = match inner.free_indices.pop() {
            Some(index) => index,
            None if inner.next_index < self.max_indices => {
                inner.next_index += 1;
                inner.next_index - 1
            }
            None => return Err(StreamError::BindlessExhausted { max: self.max_indices }),
        };
        let index = BindlessTextureIndex::new(index);
        inner.assigned.insert(handle, index);
        Ok(index)
    }

    pub fn unregister(&self, handle: TextureHandle) -> Option<BindlessTextureIndex> {
        let mut inner = self.inner();
        let index = inner.assigned.remove(handle)?;
        inner.free_indices.push(index.index());
        Some(index)
    }

    /// 未注册的句柄返回 null 下标
    pub fn get(&self, handle: TextureHandle) -> BindlessTextureIndex {
        self.inner().assigned.get(handle).copied().unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut inner = self.inner();
        inner.assigned.clear();
        inner.free_indices.clear();
        inner.next_index = 0;
    }
}
// getters
impl BindlessIndexAllocator {
    #[inline]
    pub fn max_indices(&self) -> u32 {
        self.max_indices
    }
    #[inline]
    pub fn assigned_count(&self) -> usize {
        self.inner().assigned.len()
    }
}
