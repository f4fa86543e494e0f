//! Timeshift session state and the legal-transition table

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Authoritative state of the timeshift engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimeshiftState {
    /// No session; initial and terminal state
    #[default]
    Idle,
    /// Ingest is running, waiting for the buffer to reach the readiness threshold
    Starting,
    /// Ingest is recording and playback is rendering from the buffer
    RecordingAndPlaying,
    /// Ingest is still recording, playback is paused
    PausedPlayback,
    /// Session teardown in progress; always followed by `Idle`
    Stopping,
    /// Session failed; stays here until the next start or stop
    Error { message: String },
}

impl TimeshiftState {
    /// Whether a backing buffer file exists in this state
    pub fn has_buffer(&self) -> bool {
        matches!(
            self,
            TimeshiftState::Starting
                | TimeshiftState::RecordingAndPlaying
                | TimeshiftState::PausedPlayback
                | TimeshiftState::Stopping
        )
    }

    /// Whether a session is live (ingest running, poller or playback active)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TimeshiftState::Starting
                | TimeshiftState::RecordingAndPlaying
                | TimeshiftState::PausedPlayback
        )
    }

    /// Check if the state indicates a failure
    pub fn is_error(&self) -> bool {
        matches!(self, TimeshiftState::Error { .. })
    }

    /// Failure message if the state is `Error`
    pub fn error_message(&self) -> Option<&str> {
        match self {
            TimeshiftState::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Short lowercase name for logs and terminal output
    pub fn label(&self) -> &'static str {
        match self {
            TimeshiftState::Idle => "idle",
            TimeshiftState::Starting => "starting",
            TimeshiftState::RecordingAndPlaying => "recording_and_playing",
            TimeshiftState::PausedPlayback => "paused_playback",
            TimeshiftState::Stopping => "stopping",
            TimeshiftState::Error { .. } => "error",
        }
    }

    /// Resolves the state reached from `self` on `event`.
    ///
    /// Returns `None` when the event does not apply in this state; callers
    /// treat that as a no-op rather than an error.
    pub fn next(&self, event: &TimeshiftEvent) -> Option<TimeshiftState> {
        use TimeshiftEvent as E;
        use TimeshiftState as S;

        match (self, event) {
            (_, E::Fail { message }) => Some(S::Error {
                message: message.clone(),
            }),

            (S::Idle | S::Error { .. }, E::StartNewSource) => Some(S::Starting),
            (S::Starting | S::RecordingAndPlaying | S::PausedPlayback, E::StartNewSource) => {
                Some(S::Stopping)
            }
            (S::PausedPlayback, E::StartSameSource) => Some(S::RecordingAndPlaying),

            (S::Starting, E::BufferReady) => Some(S::RecordingAndPlaying),
            (S::RecordingAndPlaying, E::Pause) => Some(S::PausedPlayback),
            (S::PausedPlayback, E::Resume) => Some(S::RecordingAndPlaying),

            (S::Starting | S::RecordingAndPlaying | S::PausedPlayback, E::Stop) => {
                Some(S::Stopping)
            }
            (S::Error { .. }, E::Stop) => Some(S::Idle),
            (S::Stopping, E::TeardownComplete) => Some(S::Idle),

            _ => None,
        }
    }
}

impl std::fmt::Display for TimeshiftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeshiftState::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeshiftEvent {
    /// `start` for the URL of the current session
    StartSameSource,
    /// `start` for a URL other than the current session's (or with no session)
    StartNewSource,
    /// Readiness poller reported enough buffered data
    BufferReady,
    /// User paused playback
    Pause,
    /// User resumed playback
    Resume,
    /// Explicit stop
    Stop,
    /// Pipelines stopped and buffer deleted
    TeardownComplete,
    /// Unrecoverable setup or pipeline failure
    Fail { message: String },
}

/// Owner of the authoritative state.
///
/// Every mutation goes through [`TimeshiftStateMachine::apply`], which only
/// performs transitions listed in [`TimeshiftState::next`].
#[derive(Debug, Default)]
pub struct TimeshiftStateMachine {
    state: TimeshiftState,
}

impl TimeshiftStateMachine {
    /// Creates a machine in the `Idle` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &TimeshiftState {
        &self.state
    }

    /// Applies `event`, returning whether the state changed
    pub fn apply(&mut self, event: TimeshiftEvent) -> bool {
        let Some(next) = self.state.next(&event) else {
            debug!("Ignoring {:?} in state {}", event, self.state);
            return false;
        };

        let from = std::mem::replace(&mut self.state, next.clone());
        info!("Timeshift state: {} -> {}", from, next);
        true
    }
}
