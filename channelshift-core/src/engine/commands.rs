//! Command definitions for the timeshift engine actor model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use url::Url;

use crate::timeshift::{ReadinessSignal, Session, SessionId, TimeshiftState};

/// Commands that can be sent to the timeshift engine actor.
///
/// Each public command carries a response channel that the actor answers
/// once the operation has been applied. Commands are processed strictly one
/// at a time, so public operations never overlap.
#[derive(Debug)]
pub enum TimeshiftCommand {
    /// Begin a session for `url`, or resume it if it is already paused.
    Start {
        url: Url,
        responder: oneshot::Sender<()>,
    },
    /// Pause playback only; ingest keeps recording.
    Pause { responder: oneshot::Sender<()> },
    /// Resume paused playback.
    Resume { responder: oneshot::Sender<()> },
    /// End the session, stop both pipelines and delete the buffer file.
    StopAndDelete { responder: oneshot::Sender<()> },
    /// Stop the session and terminate the actor.
    Shutdown { responder: oneshot::Sender<()> },
    /// Internal: readiness poller finished for `session_id`.
    BufferSignal {
        session_id: SessionId,
        signal: ReadinessSignal,
    },
}

/// Snapshot of the engine published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeshiftStatus {
    #[serde(flatten)]
    pub state: TimeshiftState,
    pub session_id: Option<SessionId>,
    pub source_url: Option<Url>,
    pub buffer_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub playback_started_at: Option<DateTime<Utc>>,
}

impl TimeshiftStatus {
    /// Builds a snapshot from the engine's state and current session
    pub fn capture(state: &TimeshiftState, session: Option<&Session>) -> Self {
        Self {
            state: state.clone(),
            session_id: session.map(Session::id),
            source_url: session.map(|s| s.stream_url().clone()),
            buffer_path: session.map(|s| s.buffer().path().to_path_buf()),
            started_at: session.map(Session::started_at),
            playback_started_at: session.and_then(Session::playback_started_at),
        }
    }
}
