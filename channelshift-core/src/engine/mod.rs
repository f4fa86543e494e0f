//! Timeshift engine actor
//!
//! The engine is the single owner of session state. It runs as a tokio
//! actor and is driven through a cloneable [`TimeshiftEngineHandle`].

pub mod actor;
pub mod commands;
pub mod core;
pub mod handle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::time::Duration;

pub use actor::spawn_timeshift_engine;
pub use commands::{TimeshiftCommand, TimeshiftStatus};
pub use handle::TimeshiftEngineHandle;
use thiserror::Error;

use crate::config::ChannelshiftConfig;
use crate::pipeline::{FfmpegIngest, FileTailPlayback, RenderTarget, SimulatedIngest};
use crate::timeshift::BufferError;

/// Errors returned by the engine handle
#[derive(Debug, Error)]
pub enum TimeshiftError {
    #[error("Timeshift engine has shut down")]
    EngineShutdown,

    #[error("Timed out after {timeout:?} waiting for engine status")]
    WaitTimeout { timeout: Duration },
}

/// Why a session ended in the error state
#[derive(Debug, Error)]
pub enum SessionFailure {
    #[error("Failed to set up timeshift buffer: {0}")]
    Setup(#[from] BufferError),

    #[error("Ingest pipeline failed: {reason}")]
    Ingest { reason: String },

    #[error("Playback pipeline failed: {reason}")]
    Playback { reason: String },

    #[error("Buffer reached only {size} of {threshold} bytes after {waited:?}")]
    StartupTimeout {
        waited: Duration,
        size: u64,
        threshold: u64,
    },
}

/// Spawns an engine recording with ffmpeg and playing back by tailing the buffer file.
pub fn spawn_production_engine(
    config: ChannelshiftConfig,
    render_target: RenderTarget,
) -> TimeshiftEngineHandle {
    spawn_timeshift_engine(
        config,
        FfmpegIngest::new(),
        FileTailPlayback::new(),
        render_target,
    )
}

/// Spawns an engine whose ingest writes synthetic data instead of reading the network.
pub fn spawn_simulated_engine(
    config: ChannelshiftConfig,
    render_target: RenderTarget,
) -> TimeshiftEngineHandle {
    let ingest = SimulatedIngest::new(config.simulation.clone());
    spawn_timeshift_engine(config, ingest, FileTailPlayback::new(), render_target)
}
