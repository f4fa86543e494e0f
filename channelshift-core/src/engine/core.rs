//! Core timeshift engine implementation for the actor model.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use url::Url;

use super::SessionFailure;
use super::commands::{TimeshiftCommand, TimeshiftStatus};
use crate::config::TimeshiftConfig;
use crate::pipeline::{
    DualPipelineController, PipelineEvent, PipelineEventSender, PipelineNotice, PipelineResult,
    PipelineRole,
};
use crate::timeshift::{
    BufferError, PollRequest, ReadinessPoller, ReadinessSignal, ScratchLease, Session, SessionId,
    TimeshiftBuffer, TimeshiftEvent, TimeshiftState, TimeshiftStateMachine,
};

/// Core timeshift engine.
///
/// Runs inside the actor task and owns every piece of session state: the
/// state machine, the pipeline controller, the current session with its
/// buffer, the readiness poller and the lease on its scratch directory.
/// All methods run to completion before
/// the next command is taken, so a status is published only once the
/// buffer-exists invariant holds again.
pub struct TimeshiftEngine {
    config: TimeshiftConfig,
    machine: TimeshiftStateMachine,
    controller: DualPipelineController,
    session: Option<Session>,
    poller: Option<ReadinessPoller>,
    scratch: Option<ScratchLease>,
    session_counter: SessionId,
    signal_sender: mpsc::UnboundedSender<TimeshiftCommand>,
    notice_sender: mpsc::UnboundedSender<PipelineNotice>,
    status: watch::Sender<TimeshiftStatus>,
}

impl TimeshiftEngine {
    /// Creates an idle engine.
    pub fn new(
        config: TimeshiftConfig,
        controller: DualPipelineController,
        signal_sender: mpsc::UnboundedSender<TimeshiftCommand>,
        notice_sender: mpsc::UnboundedSender<PipelineNotice>,
        status: watch::Sender<TimeshiftStatus>,
    ) -> Self {
        Self {
            config,
            machine: TimeshiftStateMachine::new(),
            controller,
            session: None,
            poller: None,
            scratch: None,
            session_counter: 0,
            signal_sender,
            notice_sender,
            status,
        }
    }

    pub fn state(&self) -> &TimeshiftState {
        self.machine.state()
    }

    fn current_session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(Session::id)
    }

    /// Begins a session for `url`.
    ///
    /// The same URL is a no-op while starting or playing and resumes when
    /// paused. A different URL fully tears down the current session first.
    pub async fn start(&mut self, url: Url) {
        if let Some(session) = &self.session {
            if session.stream_url() == &url {
                if *self.machine.state() == TimeshiftState::PausedPlayback {
                    self.resume_playback(TimeshiftEvent::StartSameSource).await;
                } else {
                    debug!("Already {} for {}; ignoring start", self.state(), url);
                }
                return;
            }

            info!("Switching source {} -> {}", session.stream_url(), url);
            self.apply(TimeshiftEvent::StartNewSource);
            self.teardown_session().await;
            self.apply(TimeshiftEvent::TeardownComplete);
        }

        self.begin_session(url).await;
    }

    async fn begin_session(&mut self, url: Url) {
        // The buffer must exist before the state can read `starting`
        let buffer = match self.create_buffer() {
            Ok(buffer) => buffer,
            Err(e) => {
                self.record_failure(SessionFailure::Setup(e));
                return;
            }
        };

        self.session_counter += 1;
        let session_id = self.session_counter;
        let path = buffer.path().to_path_buf();
        info!(
            "Starting session {} for {} into {}",
            session_id,
            url,
            path.display()
        );
        self.session = Some(Session::new(session_id, url.clone(), buffer));
        self.apply(TimeshiftEvent::StartNewSource);

        if let Err(e) = self.launch_ingest(session_id, &url, &path).await {
            self.fail_session(SessionFailure::Ingest {
                reason: e.to_string(),
            })
            .await;
            return;
        }

        let signals = self.signal_sender.clone();
        self.poller = Some(ReadinessPoller::start(
            PollRequest {
                path,
                threshold_bytes: self.config.min_ready_bytes,
                interval: self.config.poll_interval,
                deadline: self.config.startup_timeout,
            },
            move |signal| {
                let _ = signals.send(TimeshiftCommand::BufferSignal { session_id, signal });
            },
        ));
    }

    /// Creates a buffer in this engine's scratch directory, claiming the
    /// directory on first use.
    fn create_buffer(&mut self) -> Result<TimeshiftBuffer, BufferError> {
        let lease = match self.scratch.take() {
            Some(lease) => lease,
            None => ScratchLease::acquire(&self.config.scratch_dir)?,
        };
        let buffer = TimeshiftBuffer::create(lease.dir());
        self.scratch = Some(lease);
        buffer
    }

    async fn launch_ingest(&mut self, id: SessionId, url: &Url, path: &Path) -> PipelineResult<()> {
        self.controller.configure_ingest(url, path).await?;
        let events = self.events(id, PipelineRole::Ingest);
        self.controller.start_ingest(events).await
    }

    async fn launch_playback(&mut self, id: SessionId, path: &Path) -> PipelineResult<()> {
        self.controller.configure_playback(path).await?;
        let events = self.events(id, PipelineRole::Playback);
        self.controller.start_playback(events).await
    }

    fn events(&self, session_id: SessionId, role: PipelineRole) -> PipelineEventSender {
        PipelineEventSender::new(session_id, role, self.notice_sender.clone())
    }

    /// Handles the readiness poller's one signal.
    pub async fn on_buffer_signal(&mut self, session_id: SessionId, signal: ReadinessSignal) {
        if self.current_session_id() != Some(session_id)
            || *self.machine.state() != TimeshiftState::Starting
        {
            debug!(
                "Dropping stale readiness signal {:?} for session {}",
                signal, session_id
            );
            return;
        }

        // Finished; dropping only releases the handle
        self.poller = None;

        match signal {
            ReadinessSignal::Ready { size } => {
                info!("Buffer ready at {} bytes; attaching playback", size);
                let Some(path) = self.buffer_path() else {
                    return;
                };

                if let Err(e) = self.launch_playback(session_id, &path).await {
                    self.fail_session(SessionFailure::Playback {
                        reason: e.to_string(),
                    })
                    .await;
                    return;
                }

                if let Some(session) = self.session.as_mut() {
                    session.mark_playback_started();
                }
                self.apply(TimeshiftEvent::BufferReady);
            }
            ReadinessSignal::TimedOut { size, waited } => {
                self.fail_session(SessionFailure::StartupTimeout {
                    waited,
                    size,
                    threshold: self.config.min_ready_bytes,
                })
                .await;
            }
        }
    }

    /// Handles an asynchronous pipeline notice.
    pub async fn on_pipeline_notice(&mut self, notice: PipelineNotice) {
        if self.current_session_id() != Some(notice.session_id) || !self.state().is_active() {
            debug!(
                "Dropping stale {} notice {:?} for session {}",
                notice.role, notice.event, notice.session_id
            );
            return;
        }

        match notice.event {
            PipelineEvent::Failed { reason } => {
                let failure = match notice.role {
                    PipelineRole::Ingest => SessionFailure::Ingest { reason },
                    PipelineRole::Playback => SessionFailure::Playback { reason },
                };
                self.fail_session(failure).await;
            }
            PipelineEvent::EndOfStream => {
                info!(
                    "{} pipeline reached end of stream for session {}",
                    notice.role, notice.session_id
                );
            }
        }
    }

    /// Pauses playback while ingest keeps recording.
    pub async fn pause(&mut self) {
        if *self.machine.state() != TimeshiftState::RecordingAndPlaying {
            debug!("Pause ignored in state {}", self.state());
            return;
        }

        match self.controller.pause_playback_only().await {
            Ok(()) => self.apply(TimeshiftEvent::Pause),
            Err(e) => {
                self.fail_session(SessionFailure::Playback {
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    /// Resumes paused playback.
    pub async fn resume(&mut self) {
        if *self.machine.state() != TimeshiftState::PausedPlayback {
            debug!("Resume ignored in state {}", self.state());
            return;
        }
        self.resume_playback(TimeshiftEvent::Resume).await;
    }

    async fn resume_playback(&mut self, event: TimeshiftEvent) {
        match self.controller.resume_playback_only().await {
            Ok(()) => self.apply(event),
            Err(e) => {
                self.fail_session(SessionFailure::Playback {
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    /// Ends the session and deletes its buffer. Safe from any state.
    pub async fn stop_and_delete(&mut self) {
        match self.machine.state() {
            TimeshiftState::Idle => debug!("Stop ignored; no session"),
            TimeshiftState::Error { .. } => self.apply(TimeshiftEvent::Stop),
            _ => {
                self.apply(TimeshiftEvent::Stop);
                self.teardown_session().await;
                self.apply(TimeshiftEvent::TeardownComplete);
            }
        }
    }

    /// Ends any session and releases the scratch directory.
    pub async fn shutdown(&mut self) {
        self.stop_and_delete().await;
        self.scratch = None;
    }

    /// Cancels the poller, stops both pipelines and deletes the buffer.
    ///
    /// Order matters: once the poller is cancelled no readiness signal can
    /// attach playback, and the file goes last so no pipeline still holds it.
    async fn teardown_session(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.cancel().await;
        }

        self.controller.teardown().await;

        if let Some(session) = self.session.take() {
            debug!("Deleting buffer of session {}", session.id());
            session.into_buffer().delete();
        }
    }

    async fn fail_session(&mut self, failure: SessionFailure) {
        error!("Timeshift session failed: {}", failure);
        self.teardown_session().await;
        self.record_failure(failure);
    }

    fn record_failure(&mut self, failure: SessionFailure) {
        let message = failure.to_string();
        if self.machine.apply(TimeshiftEvent::Fail { message }) {
            self.publish();
        } else {
            warn!("Failure not recorded in state {}", self.state());
        }
    }

    fn buffer_path(&self) -> Option<PathBuf> {
        self.session
            .as_ref()
            .map(|session| session.buffer().path().to_path_buf())
    }

    fn apply(&mut self, event: TimeshiftEvent) {
        if self.machine.apply(event) {
            self.publish();
        }
    }

    fn publish(&self) {
        let status = TimeshiftStatus::capture(self.machine.state(), self.session.as_ref());
        self.status.send_replace(status);
    }
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
