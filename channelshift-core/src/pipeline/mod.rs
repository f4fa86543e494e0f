//! Media pipeline abstraction for both production and simulated backends
//!
//! The timeshift engine drives two independent pipelines:
//! - ingest: headless producer pulling the live stream into the buffer file
//! - playback: consumer reading the buffer file and presenting it on a surface
//!
//! Both sit behind [`MediaPipeline`] so the decode/render engine stays an
//! opaque collaborator. Only [`DualPipelineController`] calls into them.

pub mod controller;
pub mod ffmpeg;
pub mod file_tail;
pub mod simulated;
pub mod surface;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub use controller::DualPipelineController;
pub use ffmpeg::FfmpegIngest;
pub use file_tail::FileTailPlayback;
pub use simulated::SimulatedIngest;
pub use surface::{NullSurface, PlayerSurface, RenderSurface, RenderTarget};

use crate::config::{IngestConfig, PlaybackConfig};
use crate::timeshift::SessionId;

/// Which of the two pipelines an operation or notice concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineRole {
    Ingest,
    Playback,
}

impl std::fmt::Display for PipelineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineRole::Ingest => f.write_str("ingest"),
            PipelineRole::Playback => f.write_str("playback"),
        }
    }
}

/// Source a pipeline is fed before it is started
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Live network stream copied into `output`; never rendered locally
    Network {
        url: Url,
        output: PathBuf,
        options: IngestConfig,
    },
    /// Local, possibly still growing, file
    LocalFile {
        path: PathBuf,
        options: PlaybackConfig,
    },
}

/// Errors reported by pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{role} pipeline has no source configured")]
    NotConfigured { role: PipelineRole },

    #[error("{role} pipeline cannot use source: {reason}")]
    InvalidSource { role: PipelineRole, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation not supported by this pipeline: {operation}")]
    Unsupported { operation: &'static str },

    #[error("Render surface error: {reason}")]
    Surface { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Asynchronous notices a running pipeline reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The pipeline hit an unrecoverable error
    Failed { reason: String },
    /// The source ended cleanly
    EndOfStream,
}

/// A pipeline event tagged with the session and pipeline that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineNotice {
    pub session_id: SessionId,
    pub role: PipelineRole,
    pub event: PipelineEvent,
}

/// Channel a running pipeline uses to report back to the engine
#[derive(Debug, Clone)]
pub struct PipelineEventSender {
    session_id: SessionId,
    role: PipelineRole,
    sender: mpsc::UnboundedSender<PipelineNotice>,
}

impl PipelineEventSender {
    /// Creates a sender tagging every notice with `session_id` and `role`
    pub fn new(
        session_id: SessionId,
        role: PipelineRole,
        sender: mpsc::UnboundedSender<PipelineNotice>,
    ) -> Self {
        Self {
            session_id,
            role,
            sender,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn role(&self) -> PipelineRole {
        self.role
    }

    /// Reports an unrecoverable failure
    pub fn failed(&self, reason: impl Into<String>) {
        self.send(PipelineEvent::Failed {
            reason: reason.into(),
        });
    }

    /// Reports a clean end of stream
    pub fn end_of_stream(&self) {
        self.send(PipelineEvent::EndOfStream);
    }

    fn send(&self, event: PipelineEvent) {
        let notice = PipelineNotice {
            session_id: self.session_id,
            role: self.role,
            event,
        };
        if self.sender.send(notice).is_err() {
            tracing::debug!(
                "Dropping {} notice for session {}: engine gone",
                self.role,
                self.session_id
            );
        }
    }
}

/// One independently controllable media pipeline.
///
/// Implementations must tolerate `stop` on a pipeline that was never
/// started and `stop` called more than once.
#[async_trait]
pub trait MediaPipeline: Send {
    /// Feed the pipeline a new source; replaces any previous one
    ///
    /// # Errors
    /// - `PipelineError::InvalidSource` - Source kind not handled by this pipeline
    async fn set_source(&mut self, source: MediaSource) -> PipelineResult<()>;

    /// Route video output to `target`. Headless pipelines ignore this.
    ///
    /// # Errors
    /// - `PipelineError::Surface` - Surface could not be attached
    async fn attach_surface(&mut self, _target: RenderTarget) -> PipelineResult<()> {
        Ok(())
    }

    /// Release the render surface, if one is attached
    async fn detach_surface(&mut self) {}

    /// Start consuming the configured source
    ///
    /// # Errors
    /// - `PipelineError::NotConfigured` - No source set
    /// - `PipelineError::SpawnFailed` - Backend process could not be started
    async fn play(&mut self, events: PipelineEventSender) -> PipelineResult<()>;

    /// Pause output without releasing the source
    ///
    /// # Errors
    /// - `PipelineError::Unsupported` - Pipeline cannot pause
    async fn pause(&mut self) -> PipelineResult<()>;

    /// Resume output after `pause`
    ///
    /// # Errors
    /// - `PipelineError::Unsupported` - Pipeline cannot pause
    async fn resume(&mut self) -> PipelineResult<()>;

    /// Stop and release the source
    async fn stop(&mut self);

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sender_tags_notices() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = PipelineEventSender::new(7, PipelineRole::Ingest, tx);

        sender.failed("connection refused");
        sender.end_of_stream();

        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineNotice {
                session_id: 7,
                role: PipelineRole::Ingest,
                event: PipelineEvent::Failed {
                    reason: "connection refused".to_string()
                },
            }
        );
        assert_eq!(rx.try_recv().unwrap().event, PipelineEvent::EndOfStream);
    }

    #[test]
    fn test_event_sender_survives_closed_engine() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = PipelineEventSender::new(1, PipelineRole::Playback, tx);
        drop(rx);

        sender.failed("late failure");
    }
}
