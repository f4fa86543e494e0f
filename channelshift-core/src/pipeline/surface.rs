//! Render surfaces the playback pipeline presents into

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{PipelineError, PipelineResult};
use crate::config::PlaybackConfig;

/// Destination for presented media.
///
/// A surface is exclusively owned by the playback pipeline between `attach`
/// and `detach`; callers may only reuse or discard it after `detach`.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Prepare the surface for a new playback run
    ///
    /// # Errors
    /// - `PipelineError::Surface` - Surface could not be prepared
    async fn attach(&self, options: &PlaybackConfig) -> PipelineResult<()>;

    /// Present the next chunk of media
    ///
    /// # Errors
    /// - `PipelineError::Surface` - Surface is gone or not attached
    async fn present(&self, chunk: Bytes) -> PipelineResult<()>;

    /// Release the surface; safe to call when not attached
    async fn detach(&self);

    /// Human readable surface name
    fn name(&self) -> &str;
}

/// Opaque, cloneable handle to the engine's render surface.
///
/// The engine owns the target and exposes it so the caller can place the
/// surface in its own layout.
#[derive(Clone)]
pub struct RenderTarget {
    surface: Arc<dyn RenderSurface>,
}

impl RenderTarget {
    /// Wraps a surface implementation
    pub fn new(surface: impl RenderSurface + 'static) -> Self {
        Self {
            surface: Arc::new(surface),
        }
    }

    /// Target that discards presented media
    pub fn headless() -> Self {
        Self::new(NullSurface::new())
    }

    pub fn name(&self) -> &str {
        self.surface.name()
    }

    pub async fn attach(&self, options: &PlaybackConfig) -> PipelineResult<()> {
        self.surface.attach(options).await
    }

    pub async fn present(&self, chunk: Bytes) -> PipelineResult<()> {
        self.surface.present(chunk).await
    }

    pub async fn detach(&self) {
        self.surface.detach().await
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("surface", &self.surface.name())
            .finish()
    }
}

#[derive(Debug, Default)]
struct SurfaceStats {
    attached: AtomicBool,
    attach_count: AtomicU64,
    detach_count: AtomicU64,
    bytes_presented: AtomicU64,
}

/// Headless surface that counts what it is given.
///
/// Clones share counters, so a caller can keep one clone for inspection
/// while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct NullSurface {
    stats: Arc<SurfaceStats>,
}

impl NullSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.stats.attached.load(Ordering::SeqCst)
    }

    pub fn attach_count(&self) -> u64 {
        self.stats.attach_count.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> u64 {
        self.stats.detach_count.load(Ordering::SeqCst)
    }

    pub fn bytes_presented(&self) -> u64 {
        self.stats.bytes_presented.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSurface for NullSurface {
    async fn attach(&self, _options: &PlaybackConfig) -> PipelineResult<()> {
        self.stats.attached.store(true, Ordering::SeqCst);
        self.stats.attach_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn present(&self, chunk: Bytes) -> PipelineResult<()> {
        if !self.is_attached() {
            return Err(PipelineError::Surface {
                reason: "surface not attached".to_string(),
            });
        }
        self.stats
            .bytes_presented
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&self) {
        if self.stats.attached.swap(false, Ordering::SeqCst) {
            self.stats.detach_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "null"
    }
}

struct PlayerProcess {
    child: Child,
    stdin: ChildStdin,
}

/// Surface backed by an external player reading media from its stdin
pub struct PlayerSurface {
    player_path: PathBuf,
    title: String,
    process: Mutex<Option<PlayerProcess>>,
}

impl PlayerSurface {
    /// Creates a surface that launches `player_path` on attach
    pub fn new(player_path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            player_path: player_path.into(),
            title: title.into(),
            process: Mutex::new(None),
        }
    }

    /// Builds player arguments for reading media from stdin
    pub fn player_args(&self, options: &PlaybackConfig) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-window_title".to_string(),
            self.title.clone(),
            "-analyzeduration".to_string(),
            options.file_caching.as_micros().to_string(),
        ];
        if options.fast_seek {
            args.push("-fast".to_string());
        }
        args.push("-i".to_string());
        args.push("-".to_string());
        args
    }

    async fn kill(process: PlayerProcess) {
        let PlayerProcess { mut child, stdin } = process;
        drop(stdin);
        if let Err(e) = child.kill().await {
            debug!("Player already exited: {}", e);
        }
    }
}

#[async_trait]
impl RenderSurface for PlayerSurface {
    async fn attach(&self, options: &PlaybackConfig) -> PipelineResult<()> {
        let mut process = self.process.lock().await;
        if let Some(previous) = process.take() {
            warn!("Player surface attached twice; replacing running player");
            Self::kill(previous).await;
        }

        let args = self.player_args(options);
        info!("Launching player: {} {:?}", self.player_path.display(), args);

        let mut child = Command::new(&self.player_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::SpawnFailed {
                program: self.player_path.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| PipelineError::Surface {
            reason: "player stdin unavailable".to_string(),
        })?;

        *process = Some(PlayerProcess { child, stdin });
        Ok(())
    }

    async fn present(&self, chunk: Bytes) -> PipelineResult<()> {
        let mut process = self.process.lock().await;
        let Some(player) = process.as_mut() else {
            return Err(PipelineError::Surface {
                reason: "player not attached".to_string(),
            });
        };

        player
            .stdin
            .write_all(&chunk)
            .await
            .map_err(|e| PipelineError::Surface {
                reason: format!("player closed: {e}"),
            })
    }

    async fn detach(&self) {
        if let Some(player) = self.process.lock().await.take() {
            info!("Closing player {}", self.player_path.display());
            Self::kill(player).await;
        }
    }

    fn name(&self) -> &str {
        &self.title
    }
}
