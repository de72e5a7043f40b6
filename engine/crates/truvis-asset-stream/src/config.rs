use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 流式加载子系统的配置，对应 `config/streaming.toml`
///
/// 所有字段都有默认值，配置文件里只需要写需要覆盖的项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// worker 线程数
    pub worker_count: usize,
    /// 任务队列容量，满了之后 `load` 会阻塞
    pub job_queue_capacity: usize,
    /// 完成队列容量，同时也是每帧最多从完成队列里取出的条目数
    pub completion_queue_capacity: usize,
    /// free 之后延迟多少帧才真正销毁
    pub frames_in_flight: u64,
    pub max_bindless_textures: u32,
    /// 关闭时等待 worker 退出的时间；不填表示一直等待
    pub shutdown_timeout_ms: Option<u64>,
}
impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map_or(2, |n| n.get().min(4)),
            job_queue_capacity: 64,
            completion_queue_capacity: 10,
            frames_in_flight: 3,
            max_bindless_textures: 5000,
            shutdown_timeout_ms: None,
        }
    }
}
impl StreamingConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content).with_context(|| format!("加载配置失败: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StreamingConfig = toml::from_str(content).context("解析 TOML 配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.worker_count > 0, "worker_count must be at least 1");
        anyhow::ensure!(self.job_queue_capacity > 0, "job_queue_capacity must be at least 1");
        anyhow::ensure!(self.completion_queue_capacity > 0, "completion_queue_capacity must be at least 1");
        anyhow::ensure!(self.frames_in_flight > 0, "frames_in_flight must be at least 1");
        anyhow::ensure!(self.max_bindless_textures > 0, "max_bindless_textures must be at least 1");
        Ok(())
    }

    #[inline]
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }
}
