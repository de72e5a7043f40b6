/// `poll_token` 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollResult {
    Pending,
    Done,
    Error,
}

/// 流式加载需要的设备能力
///
/// 加载子系统不关心命令是怎么录制的，也不关心纹理和 Buffer 是什么，
/// 只负责调用时机：
/// - recorder 与 worker 一一对应，只在持有该 worker 的锁时使用
/// - 一个 batch 在 `submit_batch` 之后，直到 token 完成并被 `release_batch` 之前，都归设备所有
/// - `poll_token` 永远不阻塞；`wait_idle` 只在关闭时使用
pub trait GpuDevice: Send + Sync + 'static {
    /// 每个 worker 独占的命令录制器（对应 command pool）
    type Recorder: Send;
    /// 一次录制的命令（对应 command buffer）
    type CommandBatch: Send;
    /// 表示 GPU 上未完成工作的对象（对应 fence / timeline semaphore 值）
    type Token: Send;

    type Texture: Default + Send + Sync;
    type Buffer: Default + Send + Sync;

    fn create_recorder(&self, worker_id: usize) -> anyhow::Result<Self::Recorder>;
    fn destroy_recorder(&self, recorder: Self::Recorder);

    fn begin_batch(&self, recorder: &mut Self::Recorder) -> anyhow::Result<Self::CommandBatch>;
    fn end_batch(&self, recorder: &mut Self::Recorder, batch: &mut Self::CommandBatch) -> anyhow::Result<()>;
    fn submit_batch(&self, batch: &Self::CommandBatch) -> anyhow::Result<Self::Token>;

    fn poll_token(&self, token: &Self::Token) -> PollResult;
    fn destroy_token(&self, token: Self::Token);

    /// 把执行完（或者录制失败）的 batch 还给 recorder
    fn release_batch(&self, recorder: &mut Self::Recorder, batch: Self::CommandBatch);

    /// 阻塞直到所有已提交的工作完成
    fn wait_idle(&self);

    fn destroy_texture(&self, texture: Self::Texture);
    fn destroy_buffer(&self, buffer: Self::Buffer);
}
