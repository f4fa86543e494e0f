//! Headless ingest pipeline backed by the ffmpeg binary

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    MediaPipeline, MediaSource, PipelineError, PipelineEventSender, PipelineResult, PipelineRole,
};
use crate::config::IngestConfig;

/// Builds ffmpeg arguments copying `url` into an MPEG-TS file at `output`.
///
/// Streams are copied without re-encoding; nothing is rendered.
pub fn ingest_args(url: &Url, output: &Path, options: &IngestConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostdin"]
        .into_iter()
        .map(String::from)
        .collect();

    if options.hardware_decode {
        args.extend(["-hwaccel".to_string(), "auto".to_string()]);
    }

    if options.reconnect && matches!(url.scheme(), "http" | "https") {
        args.extend(
            [
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]
            .map(String::from),
        );
    }

    args.extend([
        "-max_delay".to_string(),
        options.network_caching.as_micros().to_string(),
        "-analyzeduration".to_string(),
        options.live_caching.as_micros().to_string(),
    ]);

    if options.drop_late_frames {
        args.extend(
            ["-fflags", "+discardcorrupt+genpts", "-err_detect", "ignore_err"].map(String::from),
        );
    }

    args.extend(["-i".to_string(), url.to_string()]);
    args.extend(
        [
            "-map",
            "0",
            "-c",
            "copy",
            "-flush_packets",
            "1",
            "-f",
            "mpegts",
            "-y",
        ]
        .map(String::from),
    );
    args.push(output.display().to_string());
    args
}

#[derive(Debug)]
struct IngestSource {
    url: Url,
    output: PathBuf,
    options: IngestConfig,
}

struct Supervisor {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Ingest pipeline running one ffmpeg child per session.
///
/// A supervisor task owns the child and reports its exit to the engine.
/// Stopping signals the supervisor, which kills the child.
#[derive(Default)]
pub struct FfmpegIngest {
    source: Option<IngestSource>,
    running: Option<Supervisor>,
}

impl FfmpegIngest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|supervisor| !supervisor.task.is_finished())
    }

    async fn supervise(
        mut child: Child,
        stop_rx: oneshot::Receiver<()>,
        events: PipelineEventSender,
    ) {
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "channelshift::ffmpeg", "{}", line);
                }
            });
        }

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => {
                    info!("ffmpeg ingest reached end of stream");
                    events.end_of_stream();
                }
                Ok(status) => {
                    warn!("ffmpeg ingest exited: {}", status);
                    events.failed(format!("ffmpeg exited with {status}"));
                }
                Err(e) => {
                    events.failed(format!("failed to wait on ffmpeg: {e}"));
                }
            },
            _ = stop_rx => {
                if let Err(e) = child.kill().await {
                    debug!("ffmpeg already exited: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl MediaPipeline for FfmpegIngest {
    async fn set_source(&mut self, source: MediaSource) -> PipelineResult<()> {
        let MediaSource::Network {
            url,
            output,
            options,
        } = source
        else {
            return Err(PipelineError::InvalidSource {
                role: PipelineRole::Ingest,
                reason: "ffmpeg ingest only reads network streams".to_string(),
            });
        };

        if self.running.is_some() {
            warn!("Replacing source of a running ffmpeg ingest");
            self.stop().await;
        }

        self.source = Some(IngestSource {
            url,
            output,
            options,
        });
        Ok(())
    }

    async fn play(&mut self, events: PipelineEventSender) -> PipelineResult<()> {
        let source = self.source.as_ref().ok_or(PipelineError::NotConfigured {
            role: PipelineRole::Ingest,
        })?;

        let args = ingest_args(&source.url, &source.output, &source.options);
        info!(
            "Starting ffmpeg ingest for session {}: {}",
            events.session_id(),
            source.url
        );
        debug!("{} {:?}", source.options.ffmpeg_path.display(), args);

        let child = Command::new(&source.options.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source_err| PipelineError::SpawnFailed {
                program: source.options.ffmpeg_path.display().to_string(),
                source: source_err,
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(Self::supervise(child, stop_rx, events));
        self.running = Some(Supervisor { stop_tx, task });
        Ok(())
    }

    async fn pause(&mut self) -> PipelineResult<()> {
        Err(PipelineError::Unsupported {
            operation: "pause ingest",
        })
    }

    async fn resume(&mut self) -> PipelineResult<()> {
        Err(PipelineError::Unsupported {
            operation: "resume ingest",
        })
    }

    async fn stop(&mut self) {
        if let Some(Supervisor { stop_tx, task }) = self.running.take() {
            let _ = stop_tx.send(());
            if let Err(e) = task.await {
                warn!("ffmpeg supervisor ended abnormally: {}", e);
            }
        }
        self.source = None;
    }

    fn backend_name(&self) -> &'static str {
        "ffmpeg"
    }
}
