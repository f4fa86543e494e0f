//! Coordination of the ingest and playback pipelines

use std::path::Path;

use tracing::{debug, info};
use url::Url;

use super::{MediaPipeline, MediaSource, PipelineEventSender, PipelineResult, RenderTarget};
use crate::config::{IngestConfig, PlaybackConfig};

/// Sole owner of the two media pipelines.
///
/// Pause and resume only ever reach the playback pipeline, so recording
/// continues while the user is paused. Teardown stops playback before
/// ingest so the ingest lifetime always covers the playback lifetime.
pub struct DualPipelineController {
    ingest: Box<dyn MediaPipeline>,
    playback: Box<dyn MediaPipeline>,
    render_target: RenderTarget,
    ingest_config: IngestConfig,
    playback_config: PlaybackConfig,
    ingest_configured: bool,
    ingest_running: bool,
    playback_configured: bool,
    playback_running: bool,
    playback_paused: bool,
    surface_attached: bool,
}

impl DualPipelineController {
    /// Creates a controller over an ingest and a playback pipeline
    pub fn new(
        ingest: Box<dyn MediaPipeline>,
        playback: Box<dyn MediaPipeline>,
        render_target: RenderTarget,
        ingest_config: IngestConfig,
        playback_config: PlaybackConfig,
    ) -> Self {
        Self {
            ingest,
            playback,
            render_target,
            ingest_config,
            playback_config,
            ingest_configured: false,
            ingest_running: false,
            playback_configured: false,
            playback_running: false,
            playback_paused: false,
            surface_attached: false,
        }
    }

    pub fn is_ingest_running(&self) -> bool {
        self.ingest_running
    }

    pub fn is_playback_running(&self) -> bool {
        self.playback_running
    }

    pub fn is_playback_paused(&self) -> bool {
        self.playback_paused
    }

    /// Points the headless ingest pipeline at the live `url`, writing to `output_path`.
    ///
    /// # Errors
    /// - `PipelineError::InvalidSource` - Ingest backend rejected the source
    pub async fn configure_ingest(&mut self, url: &Url, output_path: &Path) -> PipelineResult<()> {
        debug!(
            "Configuring {} ingest: {} -> {}",
            self.ingest.backend_name(),
            url,
            output_path.display()
        );
        self.ingest_configured = true;
        self.ingest
            .set_source(MediaSource::Network {
                url: url.clone(),
                output: output_path.to_path_buf(),
                options: self.ingest_config.clone(),
            })
            .await
    }

    /// Starts the configured ingest pipeline.
    ///
    /// # Errors
    /// - `PipelineError::NotConfigured` - `configure_ingest` was not called
    /// - `PipelineError::SpawnFailed` - Backend could not be launched
    pub async fn start_ingest(&mut self, events: PipelineEventSender) -> PipelineResult<()> {
        self.ingest.play(events).await?;
        self.ingest_running = true;
        info!("Ingest pipeline started ({})", self.ingest.backend_name());
        Ok(())
    }

    /// Points the playback pipeline at the local buffer file and attaches the render surface.
    ///
    /// # Errors
    /// - `PipelineError::InvalidSource` - Playback backend rejected the source
    /// - `PipelineError::Surface` - Render surface could not be attached
    pub async fn configure_playback(&mut self, path: &Path) -> PipelineResult<()> {
        debug!(
            "Configuring {} playback from {}",
            self.playback.backend_name(),
            path.display()
        );
        self.playback_configured = true;
        self.playback
            .set_source(MediaSource::LocalFile {
                path: path.to_path_buf(),
                options: self.playback_config.clone(),
            })
            .await?;

        self.surface_attached = true;
        self.playback
            .attach_surface(self.render_target.clone())
            .await
    }

    /// Starts the configured playback pipeline.
    ///
    /// # Errors
    /// - `PipelineError::NotConfigured` - `configure_playback` was not called
    pub async fn start_playback(&mut self, events: PipelineEventSender) -> PipelineResult<()> {
        self.playback.play(events).await?;
        self.playback_running = true;
        self.playback_paused = false;
        info!(
            "Playback pipeline started ({}) on surface {}",
            self.playback.backend_name(),
            self.render_target.name()
        );
        Ok(())
    }

    /// Pauses the playback pipeline; ingest keeps recording.
    ///
    /// # Errors
    /// - `PipelineError::Unsupported` - Playback backend cannot pause
    pub async fn pause_playback_only(&mut self) -> PipelineResult<()> {
        if !self.playback_running || self.playback_paused {
            debug!("Playback not running or already paused; nothing to pause");
            return Ok(());
        }
        self.playback.pause().await?;
        self.playback_paused = true;
        Ok(())
    }

    /// Resumes the playback pipeline; ingest is untouched.
    ///
    /// # Errors
    /// - `PipelineError::Unsupported` - Playback backend cannot pause
    pub async fn resume_playback_only(&mut self) -> PipelineResult<()> {
        if !self.playback_running || !self.playback_paused {
            debug!("Playback not paused; nothing to resume");
            return Ok(());
        }
        self.playback.resume().await?;
        self.playback_paused = false;
        Ok(())
    }

    /// Stops playback, then ingest, then detaches the render surface.
    ///
    /// Idempotent: pipelines that are not configured are left alone, so a
    /// second call does nothing.
    pub async fn teardown(&mut self) {
        if self.playback_configured {
            self.playback.stop().await;
            self.playback_configured = false;
            self.playback_running = false;
            self.playback_paused = false;
            debug!("Playback pipeline stopped");
        }

        if self.ingest_configured {
            self.ingest.stop().await;
            self.ingest_configured = false;
            self.ingest_running = false;
            debug!("Ingest pipeline stopped");
        }

        if self.surface_attached {
            self.playback.detach_surface().await;
            self.surface_attached = false;
            debug!("Render surface {} detached", self.render_target.name());
        }
    }
}
