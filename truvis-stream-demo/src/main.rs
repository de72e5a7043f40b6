//! 流式加载演示
//!
//! 用 `HeadlessDevice` 驱动完整流程：
//! 1. 后台线程创建句柄并提交加载任务（payload 用 rayon 并行生成）
//! 2. 主线程每帧 `update`，直到所有资源加载完成
//! 3. 释放一半资源，继续 tick 直到延迟销毁队列清空
//! 4. 有序关闭
//!
//! 用法：`truvis-stream-demo [config.toml] [texture_count]`

use anyhow::Context;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use truvis_asset_stream::headless_device::HeadlessDevice;
use truvis_asset_stream::{AssetManager, AssetStore, LoadRequest, StreamingConfig, TextureHandle};
use truvis_crate_tools::init_log::init_log;
use truvis_crate_tools::resource::TruvisPath;

const TEXTURE_SIZE: u32 = 64;
const MAX_TICKS: usize = 100_000;

/// 棋盘格 RGBA8 像素
fn checkerboard(size: u32, seed: usize) -> Vec<u8> {
    let cell = 8 + (seed % 4) as u32 * 4;
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let v = if (x / cell + y / cell) % 2 == 0 { 255 } else { (seed * 37 % 200) as u8 };
            [v, v, v, 255]
        })
        .collect()
}

fn load_config() -> anyhow::Result<StreamingConfig> {
    let path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| TruvisPath::config_path("streaming.toml"));
    if path.exists() {
        log::info!("Loading config from {:?}", path);
        StreamingConfig::from_file(&path)
    } else {
        log::warn!("Config {:?} not found, using defaults", path);
        Ok(StreamingConfig::default())
    }
}

/// 在后台线程上提交所有加载任务
fn spawn_loader(
    store: AssetStore<HeadlessDevice>,
    texture_count: usize,
) -> anyhow::Result<std::thread::JoinHandle<anyhow::Result<Vec<TextureHandle>>>> {
    std::thread::Builder::new()
        .name("loader".to_string())
        .spawn(move || {
            let payloads: Vec<Vec<u8>> =
                (0..texture_count).into_par_iter().map(|seed| checkerboard(TEXTURE_SIZE, seed)).collect();

            let mut handles = Vec::with_capacity(texture_count);
            for (i, payload) in payloads.into_iter().enumerate() {
                let handle = store.create_texture()?;
                let request = LoadRequest::<HeadlessDevice>::new(format!("checker-{i}"), vec![handle.into()], move |ctx| {
                    let texture = ctx.device().create_texture(TEXTURE_SIZE, TEXTURE_SIZE);
                    ctx.batch().upload_texture(&texture, &payload);
                    ctx.store().write_texture(handle, |slot| *slot = texture)?;
                    Ok(())
                })
                .on_done(move |_| log::debug!("checker-{} is ready", i));
                store.load(request)?;
                handles.push(handle);
            }
            Ok(handles)
        })
        .context("Failed to spawn loader thread")
}

fn tick_until(
    manager: &mut AssetManager<HeadlessDevice>,
    what: &str,
    mut done: impl FnMut(&AssetManager<HeadlessDevice>) -> bool,
) -> anyhow::Result<usize> {
    for tick in 0..MAX_TICKS {
        if done(manager) {
            log::info!("{} after {} ticks, {}", what, tick, manager.frame_name());
            return Ok(tick);
        }
        let report = manager.update()?;
        if report.finalized_loads > 0 || report.destroyed > 0 {
            log::debug!("{:?}", report);
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    anyhow::bail!("{what} not reached after {MAX_TICKS} ticks")
}

fn main() -> anyhow::Result<()> {
    init_log();
    tracy_client::Client::start();

    let config = load_config()?;
    let texture_count: usize = match std::env::args().nth(2) {
        Some(count) => count.parse().with_context(|| format!("invalid texture count: {count}"))?,
        None => 256,
    };
    log::info!("{:?}, loading {} textures", config, texture_count);

    let device = Arc::new(HeadlessDevice::with_completion_latency(2));
    let mut manager = AssetManager::new(device.clone(), config)?;
    let store = manager.store().clone();

    let loader = spawn_loader(store.clone(), texture_count)?;
    tick_until(&mut manager, "loader finished", |_| loader.is_finished())?;
    let handles = loader.join().map_err(|_| anyhow::anyhow!("loader thread panicked"))??;

    tick_until(&mut manager, "all textures loaded", |m| handles.iter().all(|h| m.store().is_loaded(*h)))?;
    let bindless_indices: Vec<u32> = handles.iter().map(|h| store.texture_bindless_index(*h).index()).collect();
    log::info!("bindless indices {:?}..", &bindless_indices[..bindless_indices.len().min(8)]);

    for handle in handles.iter().step_by(2) {
        store.free(*handle)?;
    }
    tick_until(&mut manager, "deferred deletions flushed", |m| m.store().pending_deletion_count() == 0)?;

    manager.shutdown()?;

    let stats = device.stats();
    log::info!("{:#?}", stats);
    anyhow::ensure!(stats.destroyed_while_in_use == 0, "resources were destroyed while still in use");
    anyhow::ensure!(stats.textures_destroyed == stats.textures_created, "leaked textures");
    Ok(())
}
