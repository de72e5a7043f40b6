use slotmap::{Key, KeyData, new_key_type};

new_key_type! { pub struct TextureHandle; }
new_key_type! { pub struct BufferHandle; }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Texture,
    Buffer,
}

/// 带类型标签的句柄，用在不同类型的资源会混在一起的地方（加载任务、延迟销毁队列）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}
impl AssetHandle {
    #[inline]
    pub fn kind(&self) -> AssetKind {
        match self {
            Self::Texture(_) => AssetKind::Texture,
            Self::Buffer(_) => AssetKind::Buffer,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Texture(handle) => handle.is_null(),
            Self::Buffer(handle) => handle.is_null(),
        }
    }

    #[inline]
    pub fn key_data(&self) -> KeyData {
        match self {
            Self::Texture(handle) => handle.data(),
            Self::Buffer(handle) => handle.data(),
        }
    }

    /// slot 在 arena 中的下标，不含代数
    #[inline]
    pub fn slot_index(&self) -> u32 {
        (self.key_data().as_ffi() & 0xffff_ffff) as u32
    }
}
impl From<TextureHandle> for AssetHandle {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}
impl From<BufferHandle> for AssetHandle {
    fn from(handle: BufferHandle) -> Self {
        Self::Buffer(handle)
    }
}
