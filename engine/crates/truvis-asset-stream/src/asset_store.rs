use crate::bindless_index::{BindlessIndexAllocator, BindlessTextureIndex};
use crate::deferred_deletion::{DeferredDeletionQueue, DrainOutcome};
use crate::device::GpuDevice;
use crate::error::{HandleError, StreamError};
use crate::frame_counter::FrameCounter;
use crate::handle::{AssetHandle, BufferHandle, TextureHandle};
use crate::handle_table::HandleTable;
use crate::loading_pipeline::{Completion, LoadJob, LoadRequest, WorkerRecorders};
use std::sync::Arc;
use truvis_async::{BoundedChannel, JobSender, PoolError};

pub(crate) struct StoreShared<D: GpuDevice> {
    pub device: Arc<D>,
    pub textures: HandleTable<TextureHandle, D::Texture>,
    pub buffers: HandleTable<BufferHandle, D::Buffer>,
    pub bindless: BindlessIndexAllocator,
    pub deletion: DeferredDeletionQueue,
    pub frame_counter: FrameCounter,
    pub jobs: JobSender,
    pub recorders: WorkerRecorders<D>,
    pub completions: BoundedChannel<Completion<D>>,
}

/// 协作方使用的资源接口
///
/// 可以 clone 到任意线程。只提供三类操作：
/// - 创建句柄并提交加载任务
/// - 通过句柄查询资源
/// - 释放句柄（延迟销毁）
pub struct AssetStore<D: GpuDevice> {
    shared: Arc<StoreShared<D>>,
}
impl<D: GpuDevice> Clone for AssetStore<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
// new & init
impl<D: GpuDevice> AssetStore<D> {
    pub(crate) fn new(shared: StoreShared<D>) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    #[inline]
    pub(crate) fn shared(&self) -> &StoreShared<D> {
        &self.shared
    }
}
// create
impl<D: GpuDevice> AssetStore<D> {
    /// 分配纹理句柄，同时分配 bindless 下标
    pub fn create_texture(&self) -> Result<TextureHandle, StreamError> {
        let handle = self.shared.textures.create();
        if let Err(e) = self.shared.bindless.register(handle) {
            // 还没有被任何人看到，可以立即回收
            self.shared.textures.free(handle)?;
            self.shared.textures.reclaim(handle)?;
            return Err(e);
        }
        Ok(handle)
    }

    pub fn create_buffer(&self) -> BufferHandle {
        self.shared.buffers.create()
    }
}
// load
impl<D: GpuDevice> AssetStore<D> {
    /// 提交加载任务；任务队列满时阻塞
    ///
    /// 不要在调用 `AssetManager::update` 的线程上提交大量任务：worker 可能正阻塞在完成队列上，
    /// 而完成队列只有那个线程会去取。这种场景用 `try_load`。
    pub fn load(&self, request: LoadRequest<D>) -> Result<(), StreamError> {
        self.submit_load(request, false)
    }

    /// 非阻塞地提交加载任务，任务队列满时返回 `PoolError::QueueFull`
    pub fn try_load(&self, request: LoadRequest<D>) -> Result<(), StreamError> {
        self.submit_load(request, true)
    }

    fn submit_load(&self, request: LoadRequest<D>, non_blocking: bool) -> Result<(), StreamError> {
        let _span = tracy_client::span!("AssetStore::load");
        assert!(!request.handles.is_empty(), "load request '{}' carries no handles", request.label);

        for (i, handle) in request.handles.iter().enumerate() {
            if let Err(e) = self.begin_load(*handle) {
                self.finish_loads(&request.handles[..i], false);
                return Err(e.into());
            }
        }

        // 提交失败时任务被 drop，由 LoadJob 结束句柄上的加载
        let job = LoadJob::new(self.clone(), request);
        let work = move |worker: &truvis_async::WorkerContext| job.run(worker);
        let submitted: Result<(), PoolError> =
            if non_blocking { self.shared.jobs.try_submit(work) } else { self.shared.jobs.submit(work) };
        submitted.map_err(StreamError::from)
    }

    fn begin_load(&self, handle: AssetHandle) -> Result<(), HandleError> {
        match handle {
            AssetHandle::Texture(h) => self.shared.textures.begin_load(h),
            AssetHandle::Buffer(h) => self.shared.buffers.begin_load(h),
        }
    }

    /// 结束加载，失效的句柄只记录日志
    pub(crate) fn finish_loads(&self, handles: &[AssetHandle], success: bool) {
        for handle in handles {
            let result = match *handle {
                AssetHandle::Texture(h) => self.shared.textures.finish_load(h, success),
                AssetHandle::Buffer(h) => self.shared.buffers.finish_load(h, success),
            };
            if let Err(e) = result {
                log::warn!("Load finished on an invalid handle: {}", e);
            }
        }
    }
}
// access
impl<D: GpuDevice> AssetStore<D> {
    /// 空句柄和已经 free 的句柄返回 None；已经被回收的句柄会 panic
    ///
    /// # 死锁
    /// `f` 执行期间持有纹理表的锁（std `RwLock`，不可重入）。在 `f` 里对同一个 store 调用
    /// `create_texture`、`free` 或 `write_texture` 会在当前线程上死锁；有其他线程在等写锁时，
    /// 嵌套的 `lookup_texture`/`read_texture` 也可能死锁。`read_*`/`write_*` 以及 buffer 的版本同样适用。
    pub fn lookup_texture<R>(&self, handle: TextureHandle, f: impl FnOnce(&D::Texture) -> R) -> Option<R> {
        self.shared.textures.lookup(handle, f)
    }

    /// 与 `lookup_texture` 相同，`f` 执行期间持有 buffer 表的锁
    pub fn lookup_buffer<R>(&self, handle: BufferHandle, f: impl FnOnce(&D::Buffer) -> R) -> Option<R> {
        self.shared.buffers.lookup(handle, f)
    }

    /// 失效的句柄返回 `HandleError`。`f` 执行期间持有资源表的共享锁，见 `lookup_texture`
    pub fn read_texture<R>(&self, handle: TextureHandle, f: impl FnOnce(&D::Texture) -> R) -> Result<R, HandleError> {
        self.shared.textures.read(handle, f)
    }

    /// `f` 执行期间持有资源表的独占锁，`f` 里不能再访问同一个 store 的纹理
    pub fn write_texture<R>(
        &self,
        handle: TextureHandle,
        f: impl FnOnce(&mut D::Texture) -> R,
    ) -> Result<R, HandleError> {
        self.shared.textures.write(handle, f)
    }

    /// `f` 执行期间持有 buffer 表的共享锁
    pub fn read_buffer<R>(&self, handle: BufferHandle, f: impl FnOnce(&D::Buffer) -> R) -> Result<R, HandleError> {
        self.shared.buffers.read(handle, f)
    }

    /// `f` 执行期间持有 buffer 表的独占锁，`f` 里不能再访问同一个 store 的 buffer
    pub fn write_buffer<R>(&self, handle: BufferHandle, f: impl FnOnce(&mut D::Buffer) -> R) -> Result<R, HandleError> {
        self.shared.buffers.write(handle, f)
    }

    pub fn is_loaded(&self, handle: impl Into<AssetHandle>) -> bool {
        match handle.into() {
            AssetHandle::Texture(h) => self.shared.textures.is_loaded(h),
            AssetHandle::Buffer(h) => self.shared.buffers.is_loaded(h),
        }
    }

    /// 未注册（或已经销毁）的纹理返回 null 下标
    #[inline]
    pub fn texture_bindless_index(&self, handle: TextureHandle) -> BindlessTextureIndex {
        self.shared.bindless.get(handle)
    }
}
// free
impl<D: GpuDevice> AssetStore<D> {
    /// 释放句柄：立即对 `lookup` 不可见，`frames_in_flight` 帧之后才真正销毁
    pub fn free(&self, handle: impl Into<AssetHandle>) -> Result<(), HandleError> {
        let handle = handle.into();
        match handle {
            AssetHandle::Texture(h) => self.shared.textures.free(h)?,
            AssetHandle::Buffer(h) => self.shared.buffers.free(h)?,
        }
        self.shared.deletion.push_delete(handle, self.shared.frame_counter.frame_id());
        Ok(())
    }

    /// 真正销毁一个已经到期的句柄
    pub(crate) fn destroy_now(&self, handle: AssetHandle) -> DrainOutcome {
        let result = match handle {
            AssetHandle::Texture(h) => self.shared.textures.reclaim(h).map(|texture| {
                self.shared.bindless.unregister(h);
                self.shared.device.destroy_texture(texture);
            }),
            AssetHandle::Buffer(h) => {
                self.shared.buffers.reclaim(h).map(|buffer| self.shared.device.destroy_buffer(buffer))
            }
        };
        match result {
            Ok(()) => DrainOutcome::Destroyed,
            Err(HandleError::Busy(_)) => {
                log::debug!("{:?} still has loads in flight, deferring its destruction", handle);
                DrainOutcome::Busy
            }
            Err(e) => {
                log::error!("Deferred deletion skipped: {}", e);
                DrainOutcome::Skipped
            }
        }
    }
}
// getters
impl<D: GpuDevice> AssetStore<D> {
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.shared.device
    }
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.shared.frame_counter.frame_id()
    }
    #[inline]
    pub fn live_texture_count(&self) -> usize {
        self.shared.textures.live_count()
    }
    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.shared.buffers.live_count()
    }
    #[inline]
    pub fn pending_deletion_count(&self) -> usize {
        self.shared.deletion.len()
    }
}
