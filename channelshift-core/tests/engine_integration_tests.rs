//! Integration tests for the timeshift engine.
//!
//! These tests drive the engine only through the public
//! TimeshiftEngineHandle API, with recording pipelines standing in for the
//! media backend. The tests grow the buffer file themselves to play the
//! part of the ingest pipeline.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use channelshift_core::config::ChannelshiftConfig;
use channelshift_core::engine::test_mocks::{
    CallLog, PipelineCall, RecordingPipeline, StalledSurface, buffer_files_in,
};
use channelshift_core::engine::{TimeshiftEngineHandle, TimeshiftStatus, spawn_timeshift_engine};
use channelshift_core::pipeline::{FileTailPlayback, NullSurface, PipelineRole, RenderTarget};
use channelshift_core::timeshift::sweep_stale_buffers;
use channelshift_core::{TimeshiftError, TimeshiftState};
use proptest::prelude::*;
use tempfile::TempDir;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// Test fixture owning the engine, its call log and its scratch directory.
struct EngineTestFixture {
    handle: TimeshiftEngineHandle,
    log: CallLog,
    surface: NullSurface,
    dir: TempDir,
}

impl EngineTestFixture {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut ChannelshiftConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ChannelshiftConfig::for_testing(dir.path());
        adjust(&mut config);

        let log = CallLog::new();
        let surface = NullSurface::new();
        let handle = spawn_timeshift_engine(
            config,
            RecordingPipeline::new(PipelineRole::Ingest, log.clone()),
            RecordingPipeline::new(PipelineRole::Playback, log.clone()),
            RenderTarget::new(surface.clone()),
        );

        Self {
            handle,
            log,
            surface,
            dir,
        }
    }

    /// Appends `bytes` to the current buffer file, as ingest would
    fn grow(&self, bytes: usize) -> PathBuf {
        let path = self
            .handle
            .status()
            .buffer_path
            .expect("session has a buffer");
        append(&path, bytes);
        path
    }

    fn buffer_files(&self) -> Vec<PathBuf> {
        buffer_files_in(self.dir.path())
    }

    async fn wait_for_state(&self, state: TimeshiftState) -> TimeshiftStatus {
        self.handle
            .wait_for(|status| status.state == state, WAIT)
            .await
            .unwrap_or_else(|e| panic!("never reached {state}: {e}"))
    }

    async fn start_playing(&self, stream_url: &Url) -> PathBuf {
        self.handle.start(stream_url.clone()).await.unwrap();
        let path = self.grow(8192);
        self.wait_for_state(TimeshiftState::RecordingAndPlaying)
            .await;
        path
    }
}

fn append(path: &Path, bytes: usize) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(&vec![0x47u8; bytes]).unwrap();
}

fn channel(n: u32) -> Url {
    Url::parse(&format!("http://tv.example/live/{n}.ts")).unwrap()
}

#[tokio::test]
async fn test_buffer_growth_starts_playback_once() {
    let fixture = EngineTestFixture::new();
    fixture.handle.start(channel(1)).await.unwrap();

    let status = fixture.handle.status();
    assert_eq!(status.state, TimeshiftState::Starting);
    assert_eq!(fixture.handle.current_source_url(), Some(channel(1)));
    assert!(fixture.log.calls_for(PipelineRole::Playback).is_empty());

    // Below the threshold nothing happens
    let path = fixture.grow(1024);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.handle.state(), TimeshiftState::Starting);

    fixture.grow(4096);
    let status = fixture
        .wait_for_state(TimeshiftState::RecordingAndPlaying)
        .await;

    assert_eq!(status.buffer_path.as_ref(), Some(&path));
    assert_eq!(fixture.log.playback_sources(), vec![path.clone()]);
    assert_eq!(fixture.log.ingest_sources(), vec![path]);
    assert_eq!(
        fixture.log.count(PipelineRole::Playback, &PipelineCall::Play),
        1
    );
    assert!(status.playback_started_at.is_some());
    assert!(fixture.surface.is_attached());
    assert_eq!(fixture.handle.buffered_bytes(), 5120);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ingest_starts_before_playback() {
    let fixture = EngineTestFixture::new();
    fixture.start_playing(&channel(1)).await;

    let calls = fixture.log.calls();
    let ingest_play = calls
        .iter()
        .position(|c| *c == (PipelineRole::Ingest, PipelineCall::Play))
        .unwrap();
    let playback_play = calls
        .iter()
        .position(|c| *c == (PipelineRole::Playback, PipelineCall::Play))
        .unwrap();
    assert!(ingest_play < playback_play);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pause_keeps_recording_and_resume_reuses_buffer() {
    let fixture = EngineTestFixture::new();
    let path = fixture.start_playing(&channel(1)).await;
    let ingest_calls = fixture.log.calls_for(PipelineRole::Ingest);

    fixture.handle.pause().await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::PausedPlayback);
    assert_eq!(fixture.log.calls_for(PipelineRole::Ingest), ingest_calls);

    // Recording continues while paused
    fixture.grow(4096);
    assert_eq!(fixture.handle.buffered_bytes(), 8192 + 4096);

    fixture.handle.resume().await.unwrap();
    let status = fixture.handle.status();
    assert_eq!(status.state, TimeshiftState::RecordingAndPlaying);
    assert_eq!(status.buffer_path, Some(path.clone()));
    assert_eq!(fixture.log.calls_for(PipelineRole::Ingest), ingest_calls);
    assert_eq!(fixture.buffer_files(), vec![path]);
    assert_eq!(
        fixture.log.count(PipelineRole::Playback, &PipelineCall::Resume),
        1
    );

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_url_is_noop_or_resume() {
    let fixture = EngineTestFixture::new();
    let path = fixture.start_playing(&channel(1)).await;

    fixture.handle.start(channel(1)).await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::RecordingAndPlaying);
    assert_eq!(fixture.log.ingest_sources().len(), 1);

    fixture.handle.pause().await.unwrap();
    fixture.handle.start(channel(1)).await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::RecordingAndPlaying);
    assert_eq!(fixture.buffer_files(), vec![path]);
    assert_eq!(fixture.log.ingest_sources().len(), 1);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pause_and_resume_out_of_state_are_ignored() {
    let fixture = EngineTestFixture::new();

    fixture.handle.pause().await.unwrap();
    fixture.handle.resume().await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::Idle);

    fixture.handle.start(channel(1)).await.unwrap();
    fixture.handle.pause().await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::Starting);

    assert_eq!(
        fixture.log.count(PipelineRole::Playback, &PipelineCall::Pause),
        0
    );

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_and_delete_is_idempotent() {
    let fixture = EngineTestFixture::new();
    let path = fixture.start_playing(&channel(1)).await;

    fixture.handle.stop_and_delete().await.unwrap();
    fixture.handle.stop_and_delete().await.unwrap();

    assert_eq!(fixture.handle.state(), TimeshiftState::Idle);
    assert!(!path.exists());
    assert_eq!(fixture.handle.current_source_url(), None);
    assert_eq!(fixture.handle.buffered_bytes(), 0);
    assert_eq!(
        fixture.log.count(PipelineRole::Ingest, &PipelineCall::Stop),
        1
    );
    assert_eq!(
        fixture.log.count(PipelineRole::Playback, &PipelineCall::Stop),
        1
    );

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_lifecycle_leaves_nothing_behind() {
    let fixture = EngineTestFixture::new();
    let path = fixture.start_playing(&channel(1)).await;

    fixture.handle.pause().await.unwrap();
    fixture.handle.resume().await.unwrap();
    fixture.handle.stop_and_delete().await.unwrap();

    assert_eq!(fixture.handle.state(), TimeshiftState::Idle);
    assert!(!path.exists());
    assert!(fixture.buffer_files().is_empty());
    assert_eq!(
        fixture.log.count(PipelineRole::Ingest, &PipelineCall::Stop),
        1
    );
    assert_eq!(
        fixture.log.count(PipelineRole::Playback, &PipelineCall::Stop),
        1
    );
    assert_eq!(fixture.surface.detach_count(), 1);
    assert!(!fixture.surface.is_attached());

    // Playback stops before ingest
    let calls = fixture.log.calls();
    let playback_stop = calls
        .iter()
        .position(|c| *c == (PipelineRole::Playback, PipelineCall::Stop))
        .unwrap();
    let ingest_stop = calls
        .iter()
        .position(|c| *c == (PipelineRole::Ingest, PipelineCall::Stop))
        .unwrap();
    assert!(playback_stop < ingest_stop);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_switching_channel_before_ready_replaces_session() {
    let fixture = EngineTestFixture::new();
    fixture.handle.start(channel(1)).await.unwrap();
    let first = fixture.grow(100);

    fixture.handle.start(channel(2)).await.unwrap();

    let status = fixture.handle.status();
    assert_eq!(status.state, TimeshiftState::Starting);
    assert_eq!(status.source_url, Some(channel(2)));
    let second = status.buffer_path.unwrap();
    assert_ne!(first, second);
    assert!(!first.exists());
    assert!(second.exists());
    assert_eq!(fixture.buffer_files(), vec![second.clone()]);
    assert_eq!(
        fixture.log.count(PipelineRole::Ingest, &PipelineCall::Stop),
        1
    );
    assert_eq!(fixture.log.ingest_sources(), vec![first, second.clone()]);
    assert!(fixture.log.playback_sources().is_empty());

    // The new session gets its own readiness cycle
    append(&second, 8192);
    fixture
        .wait_for_state(TimeshiftState::RecordingAndPlaying)
        .await;
    assert_eq!(fixture.log.playback_sources(), vec![second]);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_switching_channel_while_playing() {
    let fixture = EngineTestFixture::new();
    let first = fixture.start_playing(&channel(1)).await;

    fixture.handle.start(channel(2)).await.unwrap();

    assert_eq!(fixture.handle.state(), TimeshiftState::Starting);
    assert!(!first.exists());
    assert_eq!(fixture.buffer_files().len(), 1);
    assert_eq!(
        fixture.log.count(PipelineRole::Playback, &PipelineCall::Stop),
        1
    );
    assert_eq!(fixture.surface.detach_count(), 1);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_session_never_starts_playback() {
    let fixture = EngineTestFixture::new();
    fixture.handle.start(channel(1)).await.unwrap();
    let path = fixture.grow(100);

    fixture.handle.stop_and_delete().await.unwrap();

    // A late write to the old path must not revive the session
    std::fs::write(&path, vec![0u8; 8192]).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(fixture.handle.state(), TimeshiftState::Idle);
    assert!(fixture.log.playback_sources().is_empty());
    std::fs::remove_file(path).unwrap();

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ingest_failure_moves_to_error() {
    let fixture = EngineTestFixture::new();
    let path = fixture.start_playing(&channel(1)).await;

    fixture
        .log
        .events(PipelineRole::Ingest)
        .unwrap()
        .failed("connection reset by peer");

    let status = fixture
        .handle
        .wait_for(|s| s.state.is_error(), WAIT)
        .await
        .unwrap();
    assert!(
        status
            .state
            .error_message()
            .unwrap()
            .contains("connection reset by peer")
    );
    assert!(!path.exists());
    assert_eq!(status.buffer_path, None);
    assert_eq!(
        fixture.log.count(PipelineRole::Ingest, &PipelineCall::Stop),
        1
    );

    // A new start recovers from the error
    fixture.handle.start(channel(1)).await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::Starting);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_clears_error() {
    let fixture = EngineTestFixture::new();
    fixture.log.fail_play(PipelineRole::Ingest);

    fixture.handle.start(channel(1)).await.unwrap();
    assert!(fixture.handle.state().is_error());
    assert!(fixture.buffer_files().is_empty());

    fixture.handle.stop_and_delete().await.unwrap();
    assert_eq!(fixture.handle.state(), TimeshiftState::Idle);

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stale_pipeline_notice_is_ignored() {
    let fixture = EngineTestFixture::new();
    fixture.start_playing(&channel(1)).await;
    let old_events = fixture.log.events(PipelineRole::Playback).unwrap();

    fixture.handle.start(channel(2)).await.unwrap();
    old_events.failed("late failure from the old session");
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(fixture.handle.state(), TimeshiftState::Starting);
    assert_eq!(fixture.handle.current_source_url(), Some(channel(2)));

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_startup_timeout_fails_session() {
    let fixture = EngineTestFixture::with_config(|config| {
        config.timeshift.startup_timeout = Some(Duration::from_millis(50));
    });
    fixture.handle.start(channel(1)).await.unwrap();
    fixture.grow(100);

    let status = fixture
        .handle
        .wait_for(|s| s.state.is_error(), WAIT)
        .await
        .unwrap();

    assert!(status.state.error_message().unwrap().contains("100 of 4096"));
    assert!(fixture.buffer_files().is_empty());
    assert!(fixture.log.playback_sources().is_empty());

    fixture.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engines_sharing_scratch_dir_keep_their_buffers() {
    let fixture = EngineTestFixture::new();
    fixture.handle.start(channel(1)).await.unwrap();
    let path = fixture.grow(100);

    let mut config = ChannelshiftConfig::for_testing(fixture.dir.path());
    config.timeshift.sweep_on_start = true;
    let other = spawn_timeshift_engine(
        config,
        RecordingPipeline::new(PipelineRole::Ingest, CallLog::new()),
        RecordingPipeline::new(PipelineRole::Playback, CallLog::new()),
        RenderTarget::headless(),
    );
    other.start(channel(2)).await.unwrap();
    let other_path = other.status().buffer_path.unwrap();

    assert!(path.exists());
    assert_ne!(path.parent(), other_path.parent());
    assert_eq!(fixture.handle.state(), TimeshiftState::Starting);
    assert_eq!(sweep_stale_buffers(fixture.dir.path()), 0);
    assert_eq!(fixture.buffer_files().len(), 2);

    other.shutdown().await.unwrap();
    assert_eq!(fixture.buffer_files(), vec![path.clone()]);
    fixture.grow(8092);
    fixture
        .wait_for_state(TimeshiftState::RecordingAndPlaying)
        .await;
}

#[tokio::test]
async fn test_stop_completes_while_player_is_stalled() {
    let dir = tempfile::tempdir().unwrap();
    let surface = StalledSurface::new();
    let handle = spawn_timeshift_engine(
        ChannelshiftConfig::for_testing(dir.path()),
        RecordingPipeline::new(PipelineRole::Ingest, CallLog::new()),
        FileTailPlayback::new(),
        RenderTarget::new(surface.clone()),
    );
    handle.start(channel(1)).await.unwrap();
    let path = handle.status().buffer_path.unwrap();
    append(&path, 8192);
    handle
        .wait_for(|s| s.state == TimeshiftState::RecordingAndPlaying, WAIT)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while surface.presents_started() == 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(3), handle.stop_and_delete())
        .await
        .expect("stop_and_delete finished")
        .unwrap();

    assert_eq!(handle.state(), TimeshiftState::Idle);
    assert!(!path.exists());
    assert!(!surface.is_attached());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wait_for_times_out() {
    let fixture = EngineTestFixture::new();

    let result = fixture
        .handle
        .wait_for(
            |s| s.state == TimeshiftState::RecordingAndPlaying,
            Duration::from_millis(20),
        )
        .await;

    assert!(matches!(result, Err(TimeshiftError::WaitTimeout { .. })));
    fixture.handle.shutdown().await.unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    Start(u32),
    Pause,
    Resume,
    Stop,
    Grow,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..3).prop_map(Op::Start),
        Just(Op::Pause),
        Just(Op::Resume),
        Just(Op::Stop),
        Just(Op::Grow),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_buffer_exists_exactly_when_state_has_buffer(
        ops in proptest::collection::vec(op_strategy(), 1..12)
    ) {
        tokio_test::block_on(async {
            let fixture = EngineTestFixture::new();

            for op in ops {
                match op {
                    Op::Start(n) => fixture.handle.start(channel(n)).await.unwrap(),
                    Op::Pause => fixture.handle.pause().await.unwrap(),
                    Op::Resume => fixture.handle.resume().await.unwrap(),
                    Op::Stop => fixture.handle.stop_and_delete().await.unwrap(),
                    Op::Grow => {
                        if let Some(path) = fixture.handle.status().buffer_path {
                            append(&path, 8192);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                        }
                    }
                }

                let status = fixture.handle.status();
                let files = fixture.buffer_files();
                assert_eq!(
                    files.len() == 1,
                    status.state.has_buffer(),
                    "state {} with files {:?}",
                    status.state,
                    files
                );
                assert!(files.len() <= 1);
                if let Some(path) = &status.buffer_path {
                    assert!(path.exists());
                }
            }

            fixture.handle.shutdown().await.unwrap();
            assert!(fixture.buffer_files().is_empty());
        });
    }
}
