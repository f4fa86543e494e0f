//! Recording pipeline doubles for testing the timeshift engine.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::{ChannelshiftConfig, PlaybackConfig};
use crate::pipeline::{
    MediaPipeline, MediaSource, PipelineError, PipelineEventSender, PipelineResult, PipelineRole,
    RenderSurface, RenderTarget,
};
use crate::timeshift::buffer::is_buffer_file_name;

/// Operation a [`RecordingPipeline`] received
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    SetSource(MediaSource),
    AttachSurface,
    Play,
    Pause,
    Resume,
    Stop,
    DetachSurface,
}

#[derive(Default)]
struct LogState {
    calls: Vec<(PipelineRole, PipelineCall)>,
    senders: HashMap<PipelineRole, PipelineEventSender>,
    failing_play: HashSet<PipelineRole>,
}

/// Shared, ordered log of calls made on recording pipelines.
///
/// Both pipelines of an engine write into the same log so tests can assert
/// on cross-pipeline ordering after the pipelines have moved into the actor.
#[derive(Clone, Default)]
pub struct CallLog {
    state: Arc<Mutex<LogState>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, role: PipelineRole, call: PipelineCall) {
        self.state.lock().calls.push((role, call));
    }

    /// Every call in the order it was made
    pub fn calls(&self) -> Vec<(PipelineRole, PipelineCall)> {
        self.state.lock().calls.clone()
    }

    /// Calls made on one pipeline
    pub fn calls_for(&self, role: PipelineRole) -> Vec<PipelineCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Number of times `call` was made on `role`
    pub fn count(&self, role: PipelineRole, call: &PipelineCall) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(r, c)| *r == role && c == call)
            .count()
    }

    /// Output paths handed to the ingest pipeline, in order
    pub fn ingest_sources(&self) -> Vec<PathBuf> {
        self.calls_for(PipelineRole::Ingest)
            .into_iter()
            .filter_map(|call| match call {
                PipelineCall::SetSource(MediaSource::Network { output, .. }) => Some(output),
                _ => None,
            })
            .collect()
    }

    /// File paths handed to the playback pipeline, in order
    pub fn playback_sources(&self) -> Vec<PathBuf> {
        self.calls_for(PipelineRole::Playback)
            .into_iter()
            .filter_map(|call| match call {
                PipelineCall::SetSource(MediaSource::LocalFile { path, .. }) => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Event sender the pipeline received on its latest `play`
    pub fn events(&self, role: PipelineRole) -> Option<PipelineEventSender> {
        self.state.lock().senders.get(&role).cloned()
    }

    /// Makes every following `play` on `role` fail
    pub fn fail_play(&self, role: PipelineRole) {
        self.state.lock().failing_play.insert(role);
    }
}

/// Pipeline that only records what it is asked to do.
///
/// Attaching and detaching are forwarded to the render target so surface
/// bookkeeping matches a real playback pipeline.
pub struct RecordingPipeline {
    role: PipelineRole,
    log: CallLog,
    target: Option<RenderTarget>,
}

impl RecordingPipeline {
    pub fn new(role: PipelineRole, log: CallLog) -> Self {
        Self {
            role,
            log,
            target: None,
        }
    }
}

#[async_trait]
impl MediaPipeline for RecordingPipeline {
    async fn set_source(&mut self, source: MediaSource) -> PipelineResult<()> {
        self.log.record(self.role, PipelineCall::SetSource(source));
        Ok(())
    }

    async fn attach_surface(&mut self, target: RenderTarget) -> PipelineResult<()> {
        self.log.record(self.role, PipelineCall::AttachSurface);
        target.attach(&PlaybackConfig::default()).await?;
        self.target = Some(target);
        Ok(())
    }

    async fn detach_surface(&mut self) {
        self.log.record(self.role, PipelineCall::DetachSurface);
        if let Some(target) = self.target.take() {
            target.detach().await;
        }
    }

    async fn play(&mut self, events: PipelineEventSender) -> PipelineResult<()> {
        self.log.record(self.role, PipelineCall::Play);
        let mut state = self.log.state.lock();
        if state.failing_play.contains(&self.role) {
            return Err(PipelineError::SpawnFailed {
                program: "recording".to_string(),
                source: std::io::Error::other("configured to fail"),
            });
        }
        state.senders.insert(self.role, events);
        Ok(())
    }

    async fn pause(&mut self) -> PipelineResult<()> {
        self.log.record(self.role, PipelineCall::Pause);
        Ok(())
    }

    async fn resume(&mut self) -> PipelineResult<()> {
        self.log.record(self.role, PipelineCall::Resume);
        Ok(())
    }

    async fn stop(&mut self) {
        self.log.record(self.role, PipelineCall::Stop);
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// Scratch directory and a fast configuration writing buffers into it.
pub fn scratch_config() -> (tempfile::TempDir, ChannelshiftConfig) {
    let dir = tempfile::tempdir().expect("scratch dir");
    let config = ChannelshiftConfig::for_testing(dir.path());
    (dir, config)
}

/// Buffer files anywhere below `root`, including engine directories.
pub fn buffer_files_in(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(buffer_files_in(&path));
        } else if is_buffer_file_name(&entry.file_name().to_string_lossy()) {
            found.push(path);
        }
    }
    found
}

#[derive(Debug, Default)]
struct StallState {
    attached: AtomicBool,
    presents_started: AtomicU64,
}

/// Surface whose `present` never returns, like a player that stopped
/// reading its input.
#[derive(Debug, Clone, Default)]
pub struct StalledSurface {
    state: Arc<StallState>,
}

impl StalledSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.state.attached.load(Ordering::SeqCst)
    }

    /// Number of `present` calls that have begun and are still hanging
    pub fn presents_started(&self) -> u64 {
        self.state.presents_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSurface for StalledSurface {
    async fn attach(&self, _options: &PlaybackConfig) -> PipelineResult<()> {
        self.state.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn present(&self, _chunk: Bytes) -> PipelineResult<()> {
        self.state.presents_started.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn detach(&self) {
        self.state.attached.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "stalled"
    }
}
