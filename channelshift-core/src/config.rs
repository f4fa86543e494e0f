//! Centralized configuration for Channelshift.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Central configuration for all Channelshift components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ChannelshiftConfig {
    pub timeshift: TimeshiftConfig,
    pub ingest: IngestConfig,
    pub playback: PlaybackConfig,
    pub simulation: SimulationConfig,
}

/// Timeshift buffer and readiness configuration.
///
/// Controls where session buffers live and how much data must be on disk
/// before the playback pipeline may attach.
#[derive(Debug, Clone)]
pub struct TimeshiftConfig {
    /// Scratch directory dedicated to session buffer files
    pub scratch_dir: PathBuf,
    /// Bytes that must be buffered before playback starts
    pub min_ready_bytes: u64,
    /// Interval between buffer size samples
    pub poll_interval: Duration,
    /// Give up on a session that never reaches `min_ready_bytes` (None = wait forever)
    pub startup_timeout: Option<Duration>,
    /// Remove buffer files left behind by earlier processes when the engine starts
    pub sweep_on_start: bool,
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("channelshift").join("timeshift"),
            min_ready_bytes: 512 * 1024, // 512 KiB
            poll_interval: Duration::from_millis(250),
            startup_timeout: None,
            sweep_on_start: true,
        }
    }
}

/// Ingest pipeline tuning.
///
/// None of these affect correctness, but without bounded caching windows the
/// ingest side grows memory without limit or stalls on poor networks.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Network read-ahead window
    pub network_caching: Duration,
    /// Live source analysis window
    pub live_caching: Duration,
    /// Prefer hardware decoding where the backend decodes at all
    pub hardware_decode: bool,
    /// Drop corrupt or late frames instead of stalling
    pub drop_late_frames: bool,
    /// Reconnect dropped http(s) sources
    pub reconnect: bool,
    /// FFmpeg binary used by the production ingest pipeline
    pub ffmpeg_path: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            network_caching: Duration::from_millis(1500),
            live_caching: Duration::from_millis(1500),
            hardware_decode: true,
            drop_late_frames: true,
            reconnect: true,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Playback pipeline tuning.
///
/// Local disk reads are cheap, so the caching window is much smaller than
/// the ingest side's.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Wait before re-reading when playback catches up with the live edge
    pub file_caching: Duration,
    /// Enable fast seeking in the presenting player
    pub fast_seek: bool,
    /// Bytes read from the buffer file per presented chunk
    pub chunk_size: usize,
    /// External player used by `PlayerSurface`
    pub player_path: PathBuf,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            file_caching: Duration::from_millis(300),
            fast_seek: true,
            chunk_size: 64 * 1024, // 64 KiB
            player_path: PathBuf::from("ffplay"),
        }
    }
}

/// Simulated ingest configuration for development and testing.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Bytes appended to the buffer per tick
    pub bytes_per_tick: usize,
    /// Interval between synthetic writes
    pub tick: Duration,
    /// Report an ingest failure after this many writes (None = never)
    pub fail_after_writes: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            bytes_per_tick: 188 * 348, // 348 MPEG-TS packets
            tick: Duration::from_millis(50),
            fail_after_writes: None,
        }
    }
}

impl ChannelshiftConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CHANNELSHIFT_SCRATCH_DIR")
            && !dir.is_empty()
        {
            config.timeshift.scratch_dir = PathBuf::from(dir);
        }

        if let Ok(bytes) = std::env::var("CHANNELSHIFT_MIN_READY_BYTES")
            && let Ok(value) = bytes.parse::<u64>()
        {
            config.timeshift.min_ready_bytes = value;
        }

        if let Ok(interval) = std::env::var("CHANNELSHIFT_POLL_INTERVAL_MS")
            && let Ok(millis) = interval.parse::<u64>()
            && millis > 0
        {
            config.timeshift.poll_interval = Duration::from_millis(millis);
        }

        if let Ok(timeout) = std::env::var("CHANNELSHIFT_STARTUP_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.timeshift.startup_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Ok(path) = std::env::var("CHANNELSHIFT_FFMPEG_PATH")
            && !path.is_empty()
        {
            config.ingest.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("CHANNELSHIFT_PLAYER_PATH")
            && !path.is_empty()
        {
            config.playback.player_path = PathBuf::from(path);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Buffers go to `scratch_dir`, thresholds are small and polling is fast
    /// so scenarios complete in milliseconds.
    pub fn for_testing(scratch_dir: &Path) -> Self {
        Self {
            timeshift: TimeshiftConfig {
                scratch_dir: scratch_dir.to_path_buf(),
                min_ready_bytes: 4096,
                poll_interval: Duration::from_millis(10),
                startup_timeout: None,
                sweep_on_start: false,
            },
            playback: PlaybackConfig {
                file_caching: Duration::from_millis(10),
                ..PlaybackConfig::default()
            },
            simulation: SimulationConfig {
                bytes_per_tick: 1024,
                tick: Duration::from_millis(5),
                fail_after_writes: None,
            },
            ..Default::default()
        }
    }
}
