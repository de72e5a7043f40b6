use crate::device::{GpuDevice, PollResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 设备资源的 id，0 表示还没有创建
pub type ResourceId = u64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessTexture {
    pub id: ResourceId,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessBuffer {
    pub id: ResourceId,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessCommand {
    UploadTexture { texture: ResourceId, bytes: usize },
    UploadBuffer { buffer: ResourceId, bytes: usize },
}
impl HeadlessCommand {
    fn resource(&self) -> ResourceId {
        match self {
            Self::UploadTexture { texture, .. } => *texture,
            Self::UploadBuffer { buffer, .. } => *buffer,
        }
    }
}

pub struct HeadlessRecorder {
    worker_id: usize,
    free_batches: Vec<HeadlessBatch>,
    outstanding_batches: usize,
}
impl HeadlessRecorder {
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
    #[inline]
    pub fn outstanding_batches(&self) -> usize {
        self.outstanding_batches
    }
}

#[derive(Debug)]
pub struct HeadlessBatch {
    worker_id: usize,
    commands: Vec<HeadlessCommand>,
    faulted: bool,
}
impl HeadlessBatch {
    pub fn upload_texture(&mut self, texture: &HeadlessTexture, data: &[u8]) {
        self.commands.push(HeadlessCommand::UploadTexture {
            texture: texture.id,
            bytes: data.len(),
        });
    }

    pub fn upload_buffer(&mut self, buffer: &HeadlessBuffer, data: &[u8]) {
        self.commands.push(HeadlessCommand::UploadBuffer {
            buffer: buffer.id,
            bytes: data.len(),
        });
    }

    /// 提交后这个 batch 的 token 会报告 `PollResult::Error`
    pub fn inject_fault(&mut self) {
        self.faulted = true;
    }

    #[inline]
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }
}

/// 不可 clone，保证每个 token 只销毁一次
#[derive(Debug)]
pub struct HeadlessToken {
    id: u64,
}

struct InFlightSubmission {
    remaining_polls: u32,
    faulted: bool,
    retired: bool,
    resources: Vec<ResourceId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submitted: u64,
    pub retired: u64,
    pub faulted: u64,
    pub textures_created: u64,
    pub buffers_created: u64,
    pub textures_destroyed: u64,
    pub buffers_destroyed: u64,
    /// 销毁时仍有未完成的提交引用该资源
    pub destroyed_while_in_use: u64,
    pub double_destroyed: u64,
    pub tokens_destroyed_early: u64,
    pub live_recorders: u64,
    pub outstanding_batches: u64,
    pub uploaded_bytes: u64,
}

#[derive(Default)]
struct DeviceState {
    next_token: u64,
    submissions: HashMap<u64, InFlightSubmission>,
    /// 资源 id -> 引用它的未完成提交数
    live_resources: HashMap<ResourceId, u32>,
    stats: HeadlessStats,
}
impl DeviceState {
    fn retire(&mut self, token: u64) {
        let Some(submission) = self.submissions.get_mut(&token) else {
            return;
        };
        if submission.retired {
            return;
        }
        submission.retired = true;
        let resources = std::mem::take(&mut submission.resources);
        let faulted = submission.faulted;
        for id in resources {
            if let Some(refs) = self.live_resources.get_mut(&id) {
                *refs = refs.saturating_sub(1);
            }
        }
        self.stats.retired += 1;
        if faulted {
            self.stats.faulted += 1;
        }
    }
}

/// 纯内存的设备实现
///
/// 每个提交在被轮询 `completion_latency` 次之后完成；可以注入失败；
/// 会统计资源在仍被 GPU 使用时被销毁的次数。
pub struct HeadlessDevice {
    completion_latency: u32,
    fail_submissions: AtomicBool,
    next_resource_id: AtomicU64,
    state: Mutex<DeviceState>,
}
impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_completion_latency(1)
    }

    /// `latency` 是 token 完成之前返回 `Pending` 的次数
    pub fn with_completion_latency(latency: u32) -> Self {
        Self {
            completion_latency: latency,
            fail_submissions: AtomicBool::new(false),
            next_resource_id: AtomicU64::new(1),
            state: Mutex::new(DeviceState::default()),
        }
    }

    #[inline]
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl HeadlessDevice {
    pub fn create_texture(&self, width: u32, height: u32) -> HeadlessTexture {
        let id = self.next_resource_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        state.live_resources.insert(id, 0);
        state.stats.textures_created += 1;
        HeadlessTexture { id, width, height }
    }

    pub fn create_buffer(&self, size: u64) -> HeadlessBuffer {
        let id = self.next_resource_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        state.live_resources.insert(id, 0);
        state.stats.buffers_created += 1;
        HeadlessBuffer { id, size }
    }

    /// 之后的 `submit_batch` 全部失败
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::Release);
    }

    pub fn is_resource_alive(&self, id: ResourceId) -> bool {
        self.state().live_resources.contains_key(&id)
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state().stats.clone()
    }

    fn destroy_resource(&self, id: ResourceId) -> bool {
        // 从未被填充的 slot
        if id == 0 {
            return false;
        }
        let mut state = self.state();
        match state.live_resources.remove(&id) {
            None => {
                log::error!("HeadlessDevice: resource {} destroyed twice", id);
                state.stats.double_destroyed += 1;
                false
            }
            Some(refs) => {
                if refs > 0 {
                    log::error!("HeadlessDevice: resource {} destroyed while {} submissions still use it", id, refs);
                    state.stats.destroyed_while_in_use += 1;
                }
                true
            }
        }
    }
}

impl GpuDevice for HeadlessDevice {
    type Recorder = HeadlessRecorder;
    type CommandBatch = HeadlessBatch;
    type Token = HeadlessToken;
    type Texture = HeadlessTexture;
    type Buffer = HeadlessBuffer;

    fn create_recorder(&self, worker_id: usize) -> anyhow::Result<Self::Recorder> {
        self.state().stats.live_recorders += 1;
        Ok(HeadlessRecorder {
            worker_id,
            free_batches: Vec::new(),
            outstanding_batches: 0,
        })
    }

    fn destroy_recorder(&self, recorder: Self::Recorder) {
        if recorder.outstanding_batches > 0 {
            log::error!(
                "HeadlessDevice: recorder of worker {} destroyed with {} outstanding batches",
                recorder.worker_id,
                recorder.outstanding_batches
            );
        }
        self.state().stats.live_recorders -= 1;
    }

    fn begin_batch(&self, recorder: &mut Self::Recorder) -> anyhow::Result<Self::CommandBatch> {
        let batch = recorder.free_batches.pop().unwrap_or_else(|| HeadlessBatch {
            worker_id: recorder.worker_id,
            commands: Vec::new(),
            faulted: false,
        });
        recorder.outstanding_batches += 1;
        self.state().stats.outstanding_batches += 1;
        Ok(batch)
    }

    fn end_batch(&self, recorder: &mut Self::Recorder, batch: &mut Self::CommandBatch) -> anyhow::Result<()> {
        anyhow::ensure!(
            batch.worker_id == recorder.worker_id,
            "batch of worker {} ended on the recorder of worker {}",
            batch.worker_id,
            recorder.worker_id
        );
        Ok(())
    }

    fn submit_batch(&self, batch: &Self::CommandBatch) -> anyhow::Result<Self::Token> {
        anyhow::ensure!(!self.fail_submissions.load(Ordering::Acquire), "HeadlessDevice: submission rejected");

        let mut state = self.state();
        if let Some(command) = batch.commands.iter().find(|c| !state.live_resources.contains_key(&c.resource())) {
            anyhow::bail!("HeadlessDevice: command {:?} references a dead resource", command);
        }
        let resources: Vec<ResourceId> = batch.commands.iter().map(HeadlessCommand::resource).collect();
        for id in &resources {
            if let Some(refs) = state.live_resources.get_mut(id) {
                *refs += 1;
            }
        }
        let bytes: usize = batch
            .commands
            .iter()
            .map(|command| match command {
                HeadlessCommand::UploadTexture { bytes, .. } | HeadlessCommand::UploadBuffer { bytes, .. } => *bytes,
            })
            .sum();

        let id = state.next_token;
        state.next_token += 1;
        state.submissions.insert(
            id,
            InFlightSubmission {
                remaining_polls: self.completion_latency,
                faulted: batch.faulted,
                retired: false,
                resources,
            },
        );
        state.stats.submitted += 1;
        state.stats.uploaded_bytes += bytes as u64;
        Ok(HeadlessToken { id })
    }

    fn poll_token(&self, token: &Self::Token) -> PollResult {
        let mut state = self.state();
        let Some(submission) = state.submissions.get_mut(&token.id) else {
            log::error!("HeadlessDevice: polling unknown token {}", token.id);
            return PollResult::Error;
        };
        if submission.remaining_polls > 0 {
            submission.remaining_polls -= 1;
            return PollResult::Pending;
        }
        let faulted = submission.faulted;
        state.retire(token.id);
        if faulted { PollResult::Error } else { PollResult::Done }
    }

    fn destroy_token(&self, token: Self::Token) {
        let mut state = self.state();
        let retired = state.submissions.get(&token.id).is_some_and(|s| s.retired);
        if !retired {
            log::warn!("HeadlessDevice: token {} destroyed before completion", token.id);
            state.stats.tokens_destroyed_early += 1;
            state.retire(token.id);
        }
        state.submissions.remove(&token.id);
    }

    fn release_batch(&self, recorder: &mut Self::Recorder, mut batch: Self::CommandBatch) {
        batch.commands.clear();
        batch.faulted = false;
        recorder.outstanding_batches = recorder.outstanding_batches.saturating_sub(1);
        recorder.free_batches.push(batch);
        let mut state = self.state();
        state.stats.outstanding_batches = state.stats.outstanding_batches.saturating_sub(1);
    }

    fn wait_idle(&self) {
        let mut state = self.state();
        let tokens: Vec<u64> = state.submissions.keys().copied().collect();
        for token in tokens {
            if let Some(submission) = state.submissions.get_mut(&token) {
                submission.remaining_polls = 0;
            }
            state.retire(token);
        }
    }

    fn destroy_texture(&self, texture: Self::Texture) {
        if self.destroy_resource(texture.id) {
            self.state().stats.textures_destroyed += 1;
        }
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        if self.destroy_resource(buffer.id) {
            self.state().stats.buffers_destroyed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_completes_after_latency() {
        let device = HeadlessDevice::with_completion_latency(2);
        let mut recorder = device.create_recorder(0).unwrap();
        let texture = device.create_texture(4, 4);

        let mut batch = device.begin_batch(&mut recorder).unwrap();
        batch.upload_texture(&texture, &[0u8; 64]);
        assert_eq!(
            batch.commands(),
            &[HeadlessCommand::UploadTexture {
                texture: texture.id,
                bytes: 64
            }]
        );
        device.end_batch(&mut recorder, &mut batch).unwrap();
        let token = device.submit_batch(&batch).unwrap();

        assert_eq!(device.poll_token(&token), PollResult::Pending);
        assert_eq!(device.poll_token(&token), PollResult::Pending);
        assert_eq!(device.poll_token(&token), PollResult::Done);

        device.release_batch(&mut recorder, batch);
        device.destroy_token(token);
        assert!(device.is_resource_alive(texture.id));
        device.destroy_texture(texture);
        device.destroy_recorder(recorder);

        let stats = device.stats();
        assert_eq!(stats.retired, 1);
        assert_eq!(stats.uploaded_bytes, 64);
        assert_eq!(stats.destroyed_while_in_use, 0);
        assert_eq!(stats.live_recorders, 0);
        assert_eq!(stats.outstanding_batches, 0);
    }

    #[test]
    fn test_destroy_while_in_use_is_counted() {
        let device = HeadlessDevice::with_completion_latency(5);
        let mut recorder = device.create_recorder(0).unwrap();
        let buffer = device.create_buffer(16);

        let mut batch = device.begin_batch(&mut recorder).unwrap();
        batch.upload_buffer(&buffer, &[1u8; 16]);
        let token = device.submit_batch(&batch).unwrap();

        device.destroy_buffer(buffer.clone());
        device.destroy_buffer(buffer);
        let stats = device.stats();
        assert_eq!(stats.destroyed_while_in_use, 1);
        assert_eq!(stats.double_destroyed, 1);

        device.wait_idle();
        device.destroy_token(token);
        device.release_batch(&mut recorder, batch);
        device.destroy_recorder(recorder);
        assert_eq!(device.stats().tokens_destroyed_early, 0);
    }

    #[test]
    fn test_injected_fault() {
        let device = HeadlessDevice::with_completion_latency(0);
        let mut recorder = device.create_recorder(0).unwrap();
        let mut batch = device.begin_batch(&mut recorder).unwrap();
        batch.inject_fault();
        let token = device.submit_batch(&batch).unwrap();

        assert_eq!(device.poll_token(&token), PollResult::Error);
        assert_eq!(device.stats().faulted, 1);

        device.set_fail_submissions(true);
        assert!(device.submit_batch(&batch).is_err());

        device.destroy_token(token);
        device.release_batch(&mut recorder, batch);
        device.destroy_recorder(recorder);
    }
}
