//! 纹理与 Buffer 的流式加载
//!
//! - 协作方通过 `AssetStore` 创建句柄、提交加载任务、查询和释放资源
//! - worker 线程录制并提交命令，把完成 token 交回拥有者线程
//! - 拥有者线程每帧调用 `AssetManager::update`，轮询完成状态并延迟销毁资源

pub mod asset_manager;
pub mod asset_store;
pub mod bindless_index;
pub mod completion_tracker;
pub mod config;
pub mod deferred_deletion;
pub mod device;
pub mod error;
pub mod frame_counter;
pub mod handle;
pub mod handle_table;
pub mod headless_device;
pub mod loading_pipeline;

pub use asset_manager::{AssetManager, FrameReport};
pub use asset_store::AssetStore;
pub use config::StreamingConfig;
pub use device::{GpuDevice, PollResult};
pub use error::{HandleError, StreamError};
pub use handle::{AssetHandle, AssetKind, BufferHandle, TextureHandle};
pub use loading_pipeline::{LoadRequest, RecordContext};
