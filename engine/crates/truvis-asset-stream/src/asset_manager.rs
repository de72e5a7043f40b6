use crate::asset_store::{AssetStore, StoreShared};
use crate::bindless_index::BindlessIndexAllocator;
use crate::completion_tracker::CompletionTracker;
use crate::config::StreamingConfig;
use crate::deferred_deletion::{DeferredDeletionQueue, DrainOutcome};
use crate::device::GpuDevice;
use crate::error::StreamError;
use crate::frame_counter::FrameCounter;
use crate::handle_table::HandleTable;
use crate::loading_pipeline::WorkerRecorders;
use anyhow::Context;
use crossbeam_utils::Backoff;
use std::sync::Arc;
use std::time::Duration;
use truvis_async::{BoundedChannel, Deadline, WorkerPool};

/// 每帧 `AssetManager::update` 的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_id: u64,
    /// 本帧完成的加载数
    pub finalized_loads: usize,
    /// 本帧真正销毁的资源数
    pub destroyed: usize,
    /// 仍在等待 GPU 的加载数
    pub loads_in_flight: usize,
    pub pending_deletions: usize,
}

/// 流式加载子系统的拥有者
///
/// 由应用持有，`update` 只能在同一个线程上每帧调用一次。协作方通过 `store()` 拿到可以 clone 的 `AssetStore`。
///
/// # 生命周期
/// - `new`: 创建 worker recorder，启动线程池
/// - `update`: 推进帧号，轮询完成状态，销毁到期资源
/// - `shutdown`: 跑完所有任务，关闭线程池，等待设备 idle，销毁所有资源
pub struct AssetManager<D: GpuDevice> {
    store: AssetStore<D>,
    tracker: CompletionTracker<D>,
    worker_pool: WorkerPool,
    config: StreamingConfig,

    destroyed: bool,
}
// new & init
impl<D: GpuDevice> AssetManager<D> {
    pub fn new(device: Arc<D>, config: StreamingConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid streaming config")?;

        let recorders =
            WorkerRecorders::new(device.as_ref(), config.worker_count).context("Failed to create worker recorders")?;
        let worker_pool = match WorkerPool::new("asset-worker", config.worker_count, config.job_queue_capacity) {
            Ok(pool) => pool,
            Err(e) => {
                recorders.destroy_all(device.as_ref());
                return Err(e);
            }
        };

        let store = AssetStore::new(StoreShared {
            textures: HandleTable::new("textures"),
            buffers: HandleTable::new("buffers"),
            bindless: BindlessIndexAllocator::new(config.max_bindless_textures),
            deletion: DeferredDeletionQueue::new(config.frames_in_flight),
            frame_counter: FrameCounter::new(0, config.frames_in_flight),
            jobs: worker_pool.sender(),
            recorders,
            completions: BoundedChannel::new(config.completion_queue_capacity),
            device,
        });

        log::info!(
            "AssetManager created: {} workers, job queue {}, completion queue {}, {} frames in flight",
            config.worker_count,
            config.job_queue_capacity,
            config.completion_queue_capacity,
            config.frames_in_flight
        );

        Ok(Self {
            store,
            tracker: CompletionTracker::new(config.completion_queue_capacity),
            worker_pool,
            config,
            destroyed: false,
        })
    }
}
// update
impl<D: GpuDevice> AssetManager<D> {
    /// 每帧调用一次
    ///
    /// 1. 推进帧号
    /// 2. 轮询已提交加载的完成状态
    /// 3. 销毁已经过了 `frames_in_flight` 帧的资源
    ///
    /// 返回的错误（设备失败、加载失败）对子系统来说是不可恢复的。
    pub fn update(&mut self) -> Result<FrameReport, StreamError> {
        let _span = tracy_client::span!("AssetManager::update");
        let shared = self.store.shared();

        let frame_id = shared.frame_counter.next_frame();
        let completion = self.tracker.update(&self.store)?;
        let destroyed = shared.deletion.drain_due(frame_id, |handle| self.store.destroy_now(handle));

        Ok(FrameReport {
            frame_id,
            finalized_loads: completion.finalized,
            destroyed,
            loads_in_flight: completion.still_pending,
            pending_deletions: shared.deletion.len(),
        })
    }
}
// getters
impl<D: GpuDevice> AssetManager<D> {
    #[inline]
    pub fn store(&self) -> &AssetStore<D> {
        &self.store
    }
    #[inline]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.store.frame_id()
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        self.store.shared().frame_counter.frame_name()
    }
    /// 排队中 + 正在 worker 上执行的任务数
    #[inline]
    pub fn pending_jobs(&self) -> usize {
        self.worker_pool.pending_jobs()
    }
    #[inline]
    pub fn busy_workers(&self) -> usize {
        self.worker_pool.running_jobs()
    }

    /// 任务队列、worker、完成队列、等待列表中是否还有未完成的工作
    pub fn has_pending_work(&self) -> bool {
        !self.worker_pool.is_idle() || self.tracker.has_pending_work(&self.store)
    }
}
// destroy
impl<D: GpuDevice> AssetManager<D> {
    /// 使用配置中的 `shutdown_timeout_ms`
    pub fn shutdown(&mut self) -> Result<(), StreamError> {
        let deadline = Deadline::from_timeout(self.config.shutdown_timeout());
        self.shutdown_with_deadline(deadline)
    }

    /// 有序关闭
    ///
    /// 1. worker 还在运行时，反复等待设备 idle 并轮询，直到所有任务完成；worker 全部退出时不再等待
    /// 2. 关闭线程池，join 所有 worker
    /// 3. 等待设备 idle，处理剩余的完成条目
    /// 4. 不再检查帧号，销毁延迟销毁队列中的所有资源
    /// 5. 销毁所有还活着的资源，以及 worker recorder
    ///
    /// 重复调用直接返回 Ok。第一个遇到的错误在所有资源销毁之后返回。
    pub fn shutdown_with_deadline(&mut self, deadline: Deadline) -> Result<(), StreamError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let _span = tracy_client::span!("AssetManager::shutdown");
        log::info!("AssetManager shutting down at {}, {} jobs pending", self.frame_name(), self.pending_jobs());

        let device = self.store.device().clone();
        let mut first_error: Option<StreamError> = None;

        let backoff = Backoff::new();
        while self.has_pending_work() && !deadline.has_expired() {
            if !self.worker_pool.is_idle() && self.worker_pool.live_workers() == 0 {
                log::error!("No asset worker is alive, {} queued jobs will never run", self.pending_jobs());
                break;
            }
            device.wait_idle();
            if let Err(e) = self.tracker.update(&self.store) {
                log::error!("Error while draining loads during shutdown: {}", e);
                first_error.get_or_insert(e);
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_millis(1));
            } else {
                backoff.snooze();
            }
        }

        if let Err(e) = self.worker_pool.shutdown(deadline) {
            first_error.get_or_insert(e.into());
        }

        device.wait_idle();
        while self.tracker.has_pending_work(&self.store) {
            if let Err(e) = self.tracker.update(&self.store) {
                log::error!("Error while draining loads during shutdown: {}", e);
                first_error.get_or_insert(e);
            }
            device.wait_idle();
        }

        let shared = self.store.shared();
        let force_destroyed = shared.deletion.force_drain_all(|handle| {
            if self.store.destroy_now(handle) != DrainOutcome::Destroyed {
                log::warn!("{:?} could not be destroyed during shutdown", handle);
            }
        });

        let textures = shared.textures.drain_all();
        let buffers = shared.buffers.drain_all();
        let leaked = textures.len() + buffers.len();
        for (_, texture) in textures {
            device.destroy_texture(texture);
        }
        for (_, buffer) in buffers {
            device.destroy_buffer(buffer);
        }
        shared.bindless.clear();
        shared.recorders.destroy_all(device.as_ref());

        log::info!(
            "AssetManager shut down: {} deferred deletions flushed, {} live resources destroyed",
            force_destroyed,
            leaked
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
impl<D: GpuDevice> Drop for AssetManager<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("AssetManager shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{AssetHandle, TextureHandle};
    use crate::headless_device::HeadlessDevice;
    use crate::loading_pipeline::LoadRequest;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use truvis_async::PoolError;

    fn test_config() -> StreamingConfig {
        StreamingConfig {
            worker_count: 2,
            job_queue_capacity: 16,
            completion_queue_capacity: 10,
            frames_in_flight: 3,
            max_bindless_textures: 64,
            shutdown_timeout_ms: Some(5_000),
        }
    }

    fn manager(latency: u32) -> AssetManager<HeadlessDevice> {
        truvis_crate_tools::init_log::init_test_log();
        AssetManager::new(Arc::new(HeadlessDevice::with_completion_latency(latency)), test_config()).unwrap()
    }

    /// 创建一张 4x4 的纹理并上传
    fn texture_request(handle: TextureHandle) -> LoadRequest<HeadlessDevice> {
        LoadRequest::<HeadlessDevice>::new("texture", vec![handle.into()], move |ctx| {
            let texture = ctx.device().create_texture(4, 4);
            ctx.batch().upload_texture(&texture, &[0u8; 64]);
            ctx.store().write_texture(handle, |slot| *slot = texture)?;
            Ok(())
        })
    }

    fn tick_until(manager: &mut AssetManager<HeadlessDevice>, mut done: impl FnMut(&AssetManager<HeadlessDevice>) -> bool) {
        for _ in 0..1000 {
            if done(manager) {
                return;
            }
            manager.update().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached after 1000 ticks");
    }

    #[test]
    fn test_load_and_lookup() {
        let mut manager = manager(2);
        let store = manager.store().clone();
        let handle = store.create_texture().unwrap();
        assert!(!store.texture_bindless_index(handle).is_null());

        let done_calls = Arc::new(AtomicUsize::new(0));
        let done_calls_clone = done_calls.clone();
        store
            .load(texture_request(handle).on_done(move |handles| {
                assert_eq!(handles.len(), 1);
                done_calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(!store.is_loaded(handle));

        tick_until(&mut manager, |m| m.store().is_loaded(handle));
        assert_eq!(done_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.lookup_texture(handle, |t| (t.width, t.height)), Some((4, 4)));

        manager.shutdown().unwrap();
        let stats = manager.store().device().stats();
        assert_eq!(stats.textures_created, 1);
        assert_eq!(stats.textures_destroyed, 1);
        assert_eq!(stats.destroyed_while_in_use, 0);
        assert_eq!(stats.live_recorders, 0);
        assert_eq!(stats.outstanding_batches, 0);
    }

    #[test]
    fn test_multi_handle_load_finishes_together() {
        let mut manager = manager(1);
        let store = manager.store().clone();
        let texture = store.create_texture().unwrap();
        let buffer = store.create_buffer();

        let request = LoadRequest::<HeadlessDevice>::new("mesh", vec![texture.into(), buffer.into()], move |ctx| {
            let t = ctx.device().create_texture(2, 2);
            let b = ctx.device().create_buffer(32);
            ctx.batch().upload_texture(&t, &[0u8; 16]);
            ctx.batch().upload_buffer(&b, &[0u8; 32]);
            ctx.store().write_texture(texture, |slot| *slot = t)?;
            ctx.store().write_buffer(buffer, |slot| *slot = b)?;
            Ok(())
        });
        store.load(request).unwrap();

        tick_until(&mut manager, |m| m.store().is_loaded(texture));
        assert!(store.is_loaded(buffer));
        assert_eq!(store.lookup_buffer(buffer, |b| b.size), Some(32));
    }

    /// free 之后不足 frames_in_flight 帧时，slot 不会被复用，资源也不会被销毁
    #[test]
    fn test_freed_slot_not_reused_before_frames_in_flight() {
        let mut manager = manager(0);
        let store = manager.store().clone();
        let handle = store.create_texture().unwrap();
        store.load(texture_request(handle)).unwrap();
        tick_until(&mut manager, |m| m.store().is_loaded(handle));

        let freed_at = manager.frame_id();
        store.free(handle).unwrap();
        assert_eq!(store.lookup_texture(handle, |_| ()), None);
        assert_eq!(store.free(handle), Err(crate::error::HandleError::AlreadyFreed(handle.into())));

        let slot_index = AssetHandle::from(handle).slot_index();
        let frames_in_flight = manager.config().frames_in_flight;
        while manager.frame_id() + 1 < freed_at + frames_in_flight {
            let report = manager.update().unwrap();
            assert_eq!(report.destroyed, 0);
            let fresh = store.create_texture().unwrap();
            assert_ne!(AssetHandle::from(fresh).slot_index(), slot_index);
        }
        assert_eq!(manager.store().device().stats().textures_destroyed, 0);

        let report = manager.update().unwrap();
        assert_eq!(report.frame_id, freed_at + frames_in_flight);
        assert_eq!(report.destroyed, 1);
        assert_eq!(manager.store().device().stats().textures_destroyed, 1);

        // 下标被回收，下一次 create 会复用这个 slot
        let reused = store.create_texture().unwrap();
        assert_eq!(AssetHandle::from(reused).slot_index(), slot_index);
        assert_ne!(reused, handle);
    }

    /// free 时加载还在进行：slot 不会被回收，也不会被标记为已加载，资源不会在 GPU 使用期间被销毁
    #[test]
    fn test_free_while_load_in_flight() {
        let mut manager = manager(20);
        let store = manager.store().clone();
        let handle = store.create_texture().unwrap();
        let done_called = Arc::new(AtomicUsize::new(0));
        let done_called_clone = done_called.clone();
        store
            .load(texture_request(handle).on_done(move |_| {
                done_called_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        // 等到 worker 提交完成
        tick_until(&mut manager, |m| m.busy_workers() == 0 && m.pending_jobs() == 0);
        store.free(handle).unwrap();

        tick_until(&mut manager, |m| !m.has_pending_work() && m.store().pending_deletion_count() == 0);

        let stats = manager.store().device().stats();
        assert_eq!(stats.destroyed_while_in_use, 0);
        assert_eq!(stats.textures_destroyed, 1);
        assert!(!store.is_loaded(handle));
        // 回调仍然会在完成时调用
        assert_eq!(done_called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_error_is_raised_once() {
        let mut manager = manager(1);
        let store = manager.store().clone();
        let faulty = store.create_texture().unwrap();
        let healthy = store.create_texture().unwrap();

        store
            .load(LoadRequest::<HeadlessDevice>::new("faulty", vec![faulty.into()], |ctx| {
                ctx.batch().inject_fault();
                Ok(())
            }))
            .unwrap();
        store.load(texture_request(healthy)).unwrap();

        let mut errors = 0;
        for _ in 0..1000 {
            match manager.update() {
                Err(StreamError::DeviceFailure { handles, .. }) => {
                    assert_eq!(handles, vec![AssetHandle::from(faulty)]);
                    errors += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
                Ok(_) => {}
            }
            if errors > 0 && store.is_loaded(healthy) && !manager.has_pending_work() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(errors, 1);
        assert!(!store.is_loaded(faulty));
        assert_eq!(store.shared().textures.pending_loads(faulty), 0);
        assert_eq!(manager.store().device().stats().faulted, 1);
    }

    #[test]
    fn test_failed_load_job_surfaces_on_update() {
        let mut manager = manager(1);
        let store = manager.store().clone();
        let handle = store.create_texture().unwrap();
        store
            .load(LoadRequest::<HeadlessDevice>::new("broken", vec![handle.into()], |_| anyhow::bail!("corrupt payload")))
            .unwrap();

        let error = loop {
            match manager.update() {
                Ok(_) => std::thread::sleep(Duration::from_millis(1)),
                Err(e) => break e,
            }
        };
        match error {
            StreamError::LoadFailed { label, source, .. } => {
                assert_eq!(label, "broken");
                assert!(format!("{source:#}").contains("corrupt payload"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.shared().textures.pending_loads(handle), 0);
        assert_eq!(manager.store().device().stats().outstanding_batches, 0);
    }

    /// 单个 worker 上的 load 闭包 panic：worker 继续工作，错误在 update 上报告一次，句柄可以正常释放，shutdown 不会卡住
    #[test]
    fn test_panicking_load_job_is_reported_and_worker_survives() {
        truvis_crate_tools::init_log::init_test_log();
        let config = StreamingConfig {
            worker_count: 1,
            shutdown_timeout_ms: None,
            ..test_config()
        };
        let mut manager = AssetManager::new(Arc::new(HeadlessDevice::with_completion_latency(1)), config).unwrap();
        let store = manager.store().clone();
        let bad = store.create_texture().unwrap();
        let good = store.create_texture().unwrap();

        store
            .load(LoadRequest::<HeadlessDevice>::new("bad", vec![bad.into()], |_| panic!("decoder bug")))
            .unwrap();
        store.load(texture_request(good)).unwrap();

        let mut errors = Vec::new();
        for _ in 0..1000 {
            if let Err(e) = manager.update() {
                errors.push(e);
            }
            if store.is_loaded(good) && !manager.has_pending_work() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(errors.len(), 1);
        match errors.remove(0) {
            StreamError::LoadFailed { label, handles, source, .. } => {
                assert_eq!(label, "bad");
                assert_eq!(handles, vec![AssetHandle::from(bad)]);
                assert!(format!("{source:#}").contains("decoder bug"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.is_loaded(good));
        assert_eq!(store.shared().textures.pending_loads(bad), 0);
        assert_eq!(manager.pending_jobs(), 0);
        assert_eq!(manager.store().device().stats().outstanding_batches, 0);

        store.free(bad).unwrap();
        for _ in 0..manager.config().frames_in_flight {
            manager.update().unwrap();
        }
        assert_eq!(store.pending_deletion_count(), 0);

        manager.shutdown().unwrap();
        assert_eq!(manager.store().device().stats().live_recorders, 0);
    }

    /// 设备拒绝提交：batch 被回收，错误在 update 上报告，恢复之后可以继续加载
    #[test]
    fn test_rejected_submission_surfaces_on_update() {
        let mut manager = manager(1);
        let store = manager.store().clone();
        let device = manager.store().device().clone();
        let rejected = store.create_texture().unwrap();

        device.set_fail_submissions(true);
        store.load(texture_request(rejected)).unwrap();

        let error = loop {
            match manager.update() {
                Ok(_) => std::thread::sleep(Duration::from_millis(1)),
                Err(e) => break e,
            }
        };
        match error {
            StreamError::LoadFailed { label, handles, source, .. } => {
                assert_eq!(label, "texture");
                assert_eq!(handles, vec![AssetHandle::from(rejected)]);
                assert!(format!("{source:#}").contains("submission rejected"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.is_loaded(rejected));
        assert_eq!(store.shared().textures.pending_loads(rejected), 0);
        assert_eq!(device.stats().outstanding_batches, 0);
        assert_eq!(device.stats().submitted, 0);

        // load 闭包已经创建了设备资源，shutdown 时随句柄一起销毁
        let texture_id = store.read_texture(rejected, |t| t.id).unwrap();
        assert!(device.is_resource_alive(texture_id));

        device.set_fail_submissions(false);
        let retried = store.create_texture().unwrap();
        store.load(texture_request(retried)).unwrap();
        tick_until(&mut manager, |m| m.store().is_loaded(retried));

        manager.shutdown().unwrap();
        assert!(!device.is_resource_alive(texture_id));
        assert_eq!(device.stats().destroyed_while_in_use, 0);
    }

    /// 任务队列满时 try_load 立即失败，句柄上的加载计数被回滚
    #[test]
    fn test_try_load_reports_full_queue() {
        truvis_crate_tools::init_log::init_test_log();
        let config = StreamingConfig {
            worker_count: 1,
            job_queue_capacity: 1,
            ..test_config()
        };
        let mut manager = AssetManager::new(Arc::new(HeadlessDevice::new()), config).unwrap();
        let store = manager.store().clone();
        let (first, second, third) =
            (store.create_texture().unwrap(), store.create_texture().unwrap(), store.create_texture().unwrap());

        let release = Arc::new(AtomicBool::new(false));
        let release_clone = release.clone();
        store
            .try_load(LoadRequest::<HeadlessDevice>::new("blocking", vec![first.into()], move |ctx| {
                while !release_clone.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                let texture = ctx.device().create_texture(1, 1);
                ctx.batch().upload_texture(&texture, &[0u8; 4]);
                ctx.store().write_texture(first, |slot| *slot = texture)?;
                Ok(())
            }))
            .unwrap();
        tick_until(&mut manager, |m| m.busy_workers() == 1 && m.pending_jobs() == 1);

        store.try_load(texture_request(second)).unwrap();
        assert!(matches!(
            store.try_load(texture_request(third)),
            Err(StreamError::Pool(PoolError::QueueFull(_)))
        ));
        assert_eq!(store.shared().textures.pending_loads(third), 0);
        assert_eq!(store.shared().textures.pending_loads(second), 1);

        release.store(true, Ordering::SeqCst);
        tick_until(&mut manager, |m| m.store().is_loaded(first) && m.store().is_loaded(second));
        assert!(!store.is_loaded(third));
    }

    #[test]
    fn test_loads_from_many_threads() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 25;
        let mut manager = manager(1);
        let store = manager.store().clone();
        let loaded = Arc::new(Mutex::new(HashSet::new()));

        let producers: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = store.clone();
                let loaded = loaded.clone();
                std::thread::spawn(move || {
                    let mut handles = Vec::new();
                    for _ in 0..PER_THREAD {
                        let handle = store.create_texture().unwrap();
                        let loaded = loaded.clone();
                        store
                            .load(texture_request(handle).on_done(move |handles| {
                                loaded.lock().unwrap().insert(handles[0]);
                            }))
                            .unwrap();
                        handles.push(handle);
                    }
                    handles
                })
            })
            .collect();

        // 拥有者线程一直 tick，worker 才不会阻塞在完成队列上
        while producers.iter().any(|p| !p.is_finished()) {
            manager.update().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        let handles: Vec<TextureHandle> = producers.into_iter().flat_map(|p| p.join().unwrap()).collect();

        tick_until(&mut manager, |m| !m.has_pending_work());
        assert_eq!(loaded.lock().unwrap().len(), THREADS * PER_THREAD);
        assert!(handles.iter().all(|h| store.is_loaded(*h)));
        assert_eq!(manager.store().device().stats().submitted, (THREADS * PER_THREAD) as u64);
    }

    #[test]
    fn test_shutdown_drains_pending_work() {
        let mut manager = manager(50);
        let store = manager.store().clone();
        let handles: Vec<_> = (0..6).map(|_| store.create_texture().unwrap()).collect();
        for handle in &handles {
            store.load(texture_request(*handle)).unwrap();
        }
        store.free(handles[0]).unwrap();

        manager.shutdown().unwrap();
        // 第二次是空操作
        manager.shutdown().unwrap();

        let stats = manager.store().device().stats();
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.retired, 6);
        assert_eq!(stats.textures_destroyed, 6);
        assert_eq!(stats.destroyed_while_in_use, 0);
        assert_eq!(stats.tokens_destroyed_early, 0);
        assert_eq!(stats.live_recorders, 0);
        assert_eq!(store.live_texture_count(), 0);
        assert!(matches!(store.load(texture_request(handles[1])), Err(StreamError::Handle(_))));
    }

    #[test]
    fn test_bindless_exhaustion() {
        truvis_crate_tools::init_log::init_test_log();
        let config = StreamingConfig {
            max_bindless_textures: 2,
            ..test_config()
        };
        let manager = AssetManager::new(Arc::new(HeadlessDevice::new()), config).unwrap();
        let store = manager.store();
        store.create_texture().unwrap();
        store.create_texture().unwrap();
        assert!(matches!(store.create_texture(), Err(StreamError::BindlessExhausted { max: 2 })));
        assert_eq!(store.live_texture_count(), 2);
    }
}
