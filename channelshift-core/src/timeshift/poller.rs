//! Readiness polling for a growing buffer file
//!
//! The poller samples the size of the buffer on a fixed interval and fires a
//! single signal once enough bytes are on disk for the playback pipeline to
//! parse container headers. Size is used instead of a fixed delay because
//! stream bitrate and network speed vary per channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::buffer::TimeshiftBuffer;

/// Outcome reported by a poller exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessSignal {
    /// The buffer reached the threshold
    Ready { size: u64 },
    /// The deadline elapsed before the threshold was reached
    TimedOut { size: u64, waited: Duration },
}

/// Parameters for one polling run
#[derive(Debug, Clone)]
pub struct PollRequest {
    /// File being sampled
    pub path: PathBuf,
    /// Minimum size that counts as ready
    pub threshold_bytes: u64,
    /// Time between samples
    pub interval: Duration,
    /// Optional limit on the total wait
    pub deadline: Option<Duration>,
}

/// Owned, cancellable background task watching one buffer file.
///
/// Dropping the poller cancels it.
pub struct ReadinessPoller {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ReadinessPoller {
    /// Spawns the polling task.
    ///
    /// `on_signal` runs at most once, on the polling task, and never after
    /// `cancel` has been called.
    pub fn start<F>(request: PollRequest, on_signal: F) -> Self
    where
        F: FnOnce(ReadinessSignal) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            run_poll_loop(request, flag, on_signal).await;
        });

        Self {
            cancelled,
            task: Some(task),
        }
    }

    /// Stops sampling and waits until the task has terminated.
    ///
    /// Once this returns no callback can run, including one whose sample was
    /// already taken.
    pub async fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            // Join errors here are either our own abort or a panicking callback
            let _ = task.await;
        }
    }

    /// Whether `cancel` has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the polling task is no longer running
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }
}

impl Drop for ReadinessPoller {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_poll_loop<F>(request: PollRequest, cancelled: Arc<AtomicBool>, on_signal: F)
where
    F: FnOnce(ReadinessSignal) + Send + 'static,
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval(request.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(
        "Polling {} for {} bytes every {:?}",
        request.path.display(),
        request.threshold_bytes,
        request.interval
    );

    loop {
        ticker.tick().await;

        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let size = TimeshiftBuffer::size_of(&request.path);
        trace!("Buffer {} at {} bytes", request.path.display(), size);

        let signal = if size >= request.threshold_bytes {
            Some(ReadinessSignal::Ready { size })
        } else {
            request
                .deadline
                .filter(|deadline| started.elapsed() >= *deadline)
                .map(|_| ReadinessSignal::TimedOut {
                    size,
                    waited: started.elapsed(),
                })
        };

        if let Some(signal) = signal {
            // Cancellation may have landed while we were sampling
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            debug!("Buffer {} signalled {:?}", request.path.display(), signal);
            on_signal(signal);
            return;
        }
    }
}
