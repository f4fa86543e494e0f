//! Channelshift Core - timeshift buffering for live channel playback
//!
//! One live stream is recorded into a local file by a headless ingest
//! pipeline while a second, independently controllable pipeline plays the
//! same growing file back. Pausing stops only playback, so the viewer can
//! resume exactly where they left off without losing live content.

pub mod config;
pub mod engine;
pub mod pipeline;
pub mod timeshift;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::ChannelshiftConfig;
pub use engine::{
    SessionFailure, TimeshiftEngineHandle, TimeshiftError, TimeshiftStatus,
    spawn_production_engine, spawn_simulated_engine, spawn_timeshift_engine,
};
pub use pipeline::{MediaPipeline, PipelineError, RenderTarget};
pub use timeshift::{BufferError, TimeshiftState};

/// Core errors that can bubble up from any Channelshift subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ChannelshiftError {
    #[error("Timeshift error: {0}")]
    Timeshift(#[from] TimeshiftError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelshiftError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ChannelshiftError::Timeshift(TimeshiftError::EngineShutdown) => {
                "The player engine has stopped".to_string()
            }
            ChannelshiftError::Timeshift(TimeshiftError::WaitTimeout { timeout }) => {
                format!("Stream did not respond within {}s", timeout.as_secs())
            }
            ChannelshiftError::Pipeline(PipelineError::SpawnFailed { program, .. }) => {
                format!("Could not launch {program}; is it installed?")
            }
            ChannelshiftError::Pipeline(_) => "Playback error occurred".to_string(),
            ChannelshiftError::Buffer(_) => "Could not create the timeshift buffer".to_string(),
            ChannelshiftError::Configuration { reason } => format!("Configuration error: {reason}"),
            ChannelshiftError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ChannelshiftError::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChannelshiftError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_user_messages() {
        let err = ChannelshiftError::from(PipelineError::SpawnFailed {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(err.user_message(), "Could not launch ffmpeg; is it installed?");
        assert!(!err.is_user_error());

        let err = ChannelshiftError::from(TimeshiftError::WaitTimeout {
            timeout: Duration::from_secs(30),
        });
        assert_eq!(err.user_message(), "Stream did not respond within 30s");

        let err = ChannelshiftError::Configuration {
            reason: "scratch dir is a file".to_string(),
        };
        assert!(err.is_user_error());
    }
}
