//! Simulated ingest for development without network access

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    MediaPipeline, MediaSource, PipelineError, PipelineEventSender, PipelineResult, PipelineRole,
};
use crate::config::SimulationConfig;

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;

/// Null MPEG-TS packets filling `len` bytes
fn synthetic_packets(len: usize) -> Vec<u8> {
    let mut data = vec![0xFFu8; len];
    for offset in (0..len).step_by(TS_PACKET_SIZE) {
        data[offset] = TS_SYNC_BYTE;
    }
    data
}

struct Writer {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Ingest pipeline appending synthetic transport stream data to the buffer.
///
/// Writes `bytes_per_tick` bytes every `tick`, ignoring the stream URL.
/// With `fail_after_writes` set it reports an ingest failure after that
/// many writes, which exercises the engine's error path.
pub struct SimulatedIngest {
    config: SimulationConfig,
    output: Option<PathBuf>,
    writer: Option<Writer>,
    writes: Arc<AtomicU64>,
}

impl SimulatedIngest {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            output: None,
            writer: None,
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of chunks appended since the last `play`
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn write_loop(
        output: PathBuf,
        config: SimulationConfig,
        writes: Arc<AtomicU64>,
        mut stop_rx: oneshot::Receiver<()>,
        events: PipelineEventSender,
    ) {
        let mut file = match OpenOptions::new().append(true).open(&output).await {
            Ok(file) => file,
            Err(e) => {
                events.failed(format!("cannot open {}: {e}", output.display()));
                return;
            }
        };
        let chunk = synthetic_packets(config.bytes_per_tick);
        let mut ticker = tokio::time::interval(config.tick);

        loop {
            tokio::select! {
                _ = &mut stop_rx => return,
                _ = ticker.tick() => {}
            }

            if let Some(limit) = config.fail_after_writes
                && writes.load(Ordering::SeqCst) >= limit
            {
                warn!("Simulated ingest failing after {} writes", limit);
                events.failed(format!("simulated failure after {limit} writes"));
                return;
            }

            let written = async {
                file.write_all(&chunk).await?;
                file.flush().await
            };
            if let Err(e) = written.await {
                events.failed(format!("write to {} failed: {e}", output.display()));
                return;
            }
            writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaPipeline for SimulatedIngest {
    async fn set_source(&mut self, source: MediaSource) -> PipelineResult<()> {
        let MediaSource::Network { url, output, .. } = source else {
            return Err(PipelineError::InvalidSource {
                role: PipelineRole::Ingest,
                reason: "simulated ingest only accepts network sources".to_string(),
            });
        };

        if self.writer.is_some() {
            self.stop().await;
        }
        debug!("Simulating {} into {}", url, output.display());
        self.output = Some(output);
        Ok(())
    }

    async fn play(&mut self, events: PipelineEventSender) -> PipelineResult<()> {
        let output = self.output.clone().ok_or(PipelineError::NotConfigured {
            role: PipelineRole::Ingest,
        })?;

        info!(
            "Starting simulated ingest for session {}: {} bytes every {:?}",
            events.session_id(),
            self.config.bytes_per_tick,
            self.config.tick
        );

        self.writes.store(0, Ordering::SeqCst);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(Self::write_loop(
            output,
            self.config.clone(),
            self.writes.clone(),
            stop_rx,
            events,
        ));
        self.writer = Some(Writer { stop_tx, task });
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
        if let Some(Writer { stop_tx, task }) = self.writer.take() {
            let _ = stop_tx.send(());
            if let Err(e) = task.await {
                warn!("Simulated ingest ended abnormally: {}", e);
            }
        }
        self.output = None;
    }

    fn backend_name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use url::Url;

    use super::*;
    use crate::config::IngestConfig;
    use crate::pipeline::PipelineEvent;

    fn config(fail_after_writes: Option<u64>) -> SimulationConfig {
        SimulationConfig {
            bytes_per_tick: 376,
            tick: Duration::from_millis(5),
            fail_after_writes,
        }
    }

    fn source(output: PathBuf) -> MediaSource {
        MediaSource::Network {
            url: Url::parse("http://sim.invalid/channel/1").unwrap(),
            output,
            options: IngestConfig::default(),
        }
    }

    #[test]
    fn test_synthetic_packets_are_sync_aligned() {
        let data = synthetic_packets(TS_PACKET_SIZE * 3);

        assert_eq!(data.len(), 564);
        assert_eq!(data[0], TS_SYNC_BYTE);
        assert_eq!(data[188], TS_SYNC_BYTE);
        assert_eq!(data[376], TS_SYNC_BYTE);
        assert_eq!(data[1], 0xFF);
    }

    #[tokio::test]
    async fn test_appends_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("timeshift-sim.ts");
        std::fs::File::create(&output).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ingest = SimulatedIngest::new(config(None));
        ingest.set_source(source(output.clone())).await.unwrap();
        ingest
            .play(PipelineEventSender::new(1, PipelineRole::Ingest, tx))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        ingest.stop().await;

        let writes = ingest.writes();
        let size = std::fs::metadata(&output).unwrap().len();
        assert!(writes > 0);
        assert_eq!(size, writes * 376);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(std::fs::metadata(&output).unwrap().len(), size);
    }

    #[tokio::test]
    async fn test_reports_failure_after_limit() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("timeshift-sim.ts");
        std::fs::File::create(&output).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ingest = SimulatedIngest::new(config(Some(2)));
        ingest.set_source(source(output.clone())).await.unwrap();
        ingest
            .play(PipelineEventSender::new(5, PipelineRole::Ingest, tx))
            .await
            .unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.session_id, 5);
        assert!(matches!(notice.event, PipelineEvent::Failed { .. }));
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 2 * 376);
        ingest.stop().await;
    }

    #[tokio::test]
    async fn test_pause_is_unsupported() {
        let mut ingest = SimulatedIngest::new(config(None));

        assert!(matches!(
            ingest.pause().await,
            Err(PipelineError::Unsupported { .. })
        ));
        ingest.stop().await;
    }
}
