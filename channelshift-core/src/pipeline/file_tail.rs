//! Playback pipeline tailing the growing buffer file

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    MediaPipeline, MediaSource, PipelineError, PipelineEventSender, PipelineResult, PipelineRole,
    RenderTarget,
};
use crate::config::PlaybackConfig;

/// How long `stop` waits for the pump before aborting it
const STOP_GRACE: Duration = Duration::from_secs(2);

struct Pump {
    paused_tx: watch::Sender<bool>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Reads the buffer file from the start and presents it chunk by chunk.
///
/// When the reader reaches the end of the file it waits `file_caching` and
/// reads again, following the ingest side as it appends. Pausing holds the
/// read offset, so resuming continues exactly where the viewer left off.
#[derive(Default)]
pub struct FileTailPlayback {
    source: Option<(PathBuf, PlaybackConfig)>,
    target: Option<RenderTarget>,
    pump: Option<Pump>,
    position: Arc<AtomicU64>,
}

impl FileTailPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the buffer file presented so far in this run
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    async fn pump(
        path: PathBuf,
        options: PlaybackConfig,
        target: RenderTarget,
        position: Arc<AtomicU64>,
        mut paused_rx: watch::Receiver<bool>,
        mut stop_rx: oneshot::Receiver<()>,
        events: PipelineEventSender,
    ) {
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                events.failed(format!("cannot open {}: {e}", path.display()));
                return;
            }
        };
        let mut chunk = vec![0u8; options.chunk_size.max(1)];

        loop {
            if *paused_rx.borrow_and_update() {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    changed = paused_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = &mut stop_rx => return,
                read = file.read(&mut chunk) => match read {
                    Ok(0) => {
                        // Caught up with the live edge
                        tokio::select! {
                            _ = &mut stop_rx => return,
                            _ = tokio::time::sleep(options.file_caching) => {}
                        }
                    }
                    Ok(n) => {
                        // A surface that stops consuming must not block stop
                        let data = Bytes::copy_from_slice(&chunk[..n]);
                        tokio::select! {
                            _ = &mut stop_rx => return,
                            presented = target.present(data) => {
                                if let Err(e) = presented {
                                    events.failed(e.to_string());
                                    return;
                                }
                                position.fetch_add(n as u64, Ordering::SeqCst);
                            }
                        }
                    }
                    Err(e) => {
                        events.failed(format!("read from {} failed: {e}", path.display()));
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MediaPipeline for FileTailPlayback {
    async fn set_source(&mut self, source: MediaSource) -> PipelineResult<()> {
        let MediaSource::LocalFile { path, options } = source else {
            return Err(PipelineError::InvalidSource {
                role: PipelineRole::Playback,
                reason: "file tail playback only reads local files".to_string(),
            });
        };

        if self.pump.is_some() {
            warn!("Replacing source of running playback");
            self.stop().await;
        }
        self.source = Some((path, options));
        Ok(())
    }

    async fn attach_surface(&mut self, target: RenderTarget) -> PipelineResult<()> {
        let (_, options) = self.source.as_ref().ok_or(PipelineError::NotConfigured {
            role: PipelineRole::Playback,
        })?;
        target.attach(options).await?;
        self.target = Some(target);
        Ok(())
    }

    async fn detach_surface(&mut self) {
        if let Some(target) = self.target.take() {
            target.detach().await;
        }
    }

    async fn play(&mut self, events: PipelineEventSender) -> PipelineResult<()> {
        let (path, options) = self.source.clone().ok_or(PipelineError::NotConfigured {
            role: PipelineRole::Playback,
        })?;
        let target = self.target.clone().ok_or_else(|| PipelineError::Surface {
            reason: "no render surface attached".to_string(),
        })?;

        info!(
            "Starting playback of {} for session {}",
            path.display(),
            events.session_id()
        );

        self.position.store(0, Ordering::SeqCst);
        let (paused_tx, paused_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(Self::pump(
            path,
            options,
            target,
            self.position.clone(),
            paused_rx,
            stop_rx,
            events,
        ));
        self.pump = Some(Pump {
            paused_tx,
            stop_tx,
            task,
        });
        Ok(())
    }

    async fn pause(&mut self) -> PipelineResult<()> {
        let pump = self.pump.as_ref().ok_or(PipelineError::NotConfigured {
            role: PipelineRole::Playback,
        })?;
        pump.paused_tx.send_replace(true);
        debug!("Playback paused at byte {}", self.position());
        Ok(())
    }

    async fn resume(&mut self) -> PipelineResult<()> {
        let pump = self.pump.as_ref().ok_or(PipelineError::NotConfigured {
            role: PipelineRole::Playback,
        })?;
        pump.paused_tx.send_replace(false);
        debug!("Playback resumed at byte {}", self.position());
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(Pump { stop_tx, task, .. }) = self.pump.take() {
            let _ = stop_tx.send(());
            let abort = task.abort_handle();
            match tokio::time::timeout(STOP_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Playback pump ended abnormally: {}", e),
                Err(_) => {
                    warn!("Playback pump ignored stop for {:?}; aborting", STOP_GRACE);
                    abort.abort();
                }
            }
        }
        self.source = None;
    }

    fn backend_name(&self) -> &'static str {
        "file-tail"
    }
}
