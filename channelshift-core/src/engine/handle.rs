//! Handle for communicating with the timeshift engine actor.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use super::TimeshiftError;
use super::commands::{TimeshiftCommand, TimeshiftStatus};
use crate::pipeline::RenderTarget;
use crate::timeshift::{TimeshiftBuffer, TimeshiftState};

/// Handle for communicating with the timeshift engine actor.
///
/// This handle provides the engine's public API. It can be cloned and shared
/// across tasks; the actor stops its session and exits once every clone has
/// been dropped. Session failures are never returned from these methods, they
/// surface as [`TimeshiftState::Error`] in the published status.
#[derive(Clone)]
pub struct TimeshiftEngineHandle {
    sender: mpsc::Sender<TimeshiftCommand>,
    status: watch::Receiver<TimeshiftStatus>,
    render_target: RenderTarget,
}

impl TimeshiftEngineHandle {
    /// Creates a new handle with the given command sender and status feed.
    pub fn new(
        sender: mpsc::Sender<TimeshiftCommand>,
        status: watch::Receiver<TimeshiftStatus>,
        render_target: RenderTarget,
    ) -> Self {
        Self {
            sender,
            status,
            render_target,
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<()>) -> TimeshiftCommand,
    ) -> Result<(), TimeshiftError> {
        let (responder, rx) = oneshot::channel();

        self.sender
            .send(build(responder))
            .await
            .map_err(|_| TimeshiftError::EngineShutdown)?;

        rx.await.map_err(|_| TimeshiftError::EngineShutdown)
    }

    /// Begins timeshift playback of `stream_url`.
    ///
    /// Returns once ingest has been started and readiness polling launched;
    /// it does not wait for playback. Starting the current URL again is a
    /// no-op, or resumes playback when paused. Starting a different URL
    /// tears the current session down first.
    ///
    /// # Errors
    /// - `TimeshiftError::EngineShutdown` - Engine actor is gone
    pub async fn start(&self, stream_url: Url) -> Result<(), TimeshiftError> {
        self.request(|responder| TimeshiftCommand::Start {
            url: stream_url,
            responder,
        })
        .await
    }

    /// Pauses playback while recording continues.
    ///
    /// Ignored unless playback is running.
    ///
    /// # Errors
    /// - `TimeshiftError::EngineShutdown` - Engine actor is gone
    pub async fn pause(&self) -> Result<(), TimeshiftError> {
        self.request(|responder| TimeshiftCommand::Pause { responder })
            .await
    }

    /// Resumes paused playback from where it stopped.
    ///
    /// # Errors
    /// - `TimeshiftError::EngineShutdown` - Engine actor is gone
    pub async fn resume(&self) -> Result<(), TimeshiftError> {
        self.request(|responder| TimeshiftCommand::Resume { responder })
            .await
    }

    /// Stops both pipelines and deletes the buffer file.
    ///
    /// Safe to call in any state; leaves the engine idle.
    ///
    /// # Errors
    /// - `TimeshiftError::EngineShutdown` - Engine actor is gone
    pub async fn stop_and_delete(&self) -> Result<(), TimeshiftError> {
        self.request(|responder| TimeshiftCommand::StopAndDelete { responder })
            .await
    }

    /// Stops the current session and terminates the actor.
    ///
    /// After this call, all subsequent operations return `TimeshiftError::EngineShutdown`.
    ///
    /// # Errors
    /// - `TimeshiftError::EngineShutdown` - Engine actor is already gone
    pub async fn shutdown(&self) -> Result<(), TimeshiftError> {
        self.request(|responder| TimeshiftCommand::Shutdown { responder })
            .await
    }

    /// Latest published status snapshot.
    pub fn status(&self) -> TimeshiftStatus {
        self.status.borrow().clone()
    }

    /// Current engine state.
    pub fn state(&self) -> TimeshiftState {
        self.status.borrow().state.clone()
    }

    /// Stream URL of the active session, if any.
    pub fn current_source_url(&self) -> Option<Url> {
        self.status.borrow().source_url.clone()
    }

    /// Size of the current buffer file; 0 without a session.
    pub fn buffered_bytes(&self) -> u64 {
        self.status
            .borrow()
            .buffer_path
            .as_deref()
            .map_or(0, TimeshiftBuffer::size_of)
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<TimeshiftStatus> {
        self.status.clone()
    }

    /// Surface the playback pipeline renders into.
    pub fn render_target(&self) -> RenderTarget {
        self.render_target.clone()
    }

    /// Waits until the published status satisfies `predicate`.
    ///
    /// # Errors
    /// - `TimeshiftError::WaitTimeout` - Status did not match within `timeout`
    /// - `TimeshiftError::EngineShutdown` - Engine exited before a match
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&TimeshiftStatus) -> bool,
        timeout: Duration,
    ) -> Result<TimeshiftStatus, TimeshiftError> {
        let mut status = self.status.clone();
        match tokio::time::timeout(timeout, status.wait_for(predicate)).await {
            Ok(Ok(matched)) => Ok(matched.clone()),
            Ok(Err(_)) => Err(TimeshiftError::EngineShutdown),
            Err(_) => Err(TimeshiftError::WaitTimeout { timeout }),
        }
    }

    /// Checks if the engine actor is still running.
    ///
    /// Returns true if the command channel is still open.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl std::fmt::Debug for TimeshiftEngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeshiftEngineHandle")
            .field("state", &self.status.borrow().state)
            .field("running", &self.is_running())
            .finish()
    }
}
