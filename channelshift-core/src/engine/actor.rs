//! Actor implementation for the timeshift engine.

use tokio::sync::{mpsc, watch};

use super::commands::{TimeshiftCommand, TimeshiftStatus};
use super::core::TimeshiftEngine;
use super::handle::TimeshiftEngineHandle;
use crate::config::ChannelshiftConfig;
use crate::pipeline::{DualPipelineController, MediaPipeline, PipelineNotice, RenderTarget};
use crate::timeshift::sweep_stale_buffers;

/// Spawns the timeshift engine actor and returns its handle.
///
/// The actor owns both pipelines through a [`DualPipelineController`] and
/// processes commands sequentially, so public operations never overlap.
/// Poller signals and pipeline notices are handled by the same loop.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use channelshift_core::config::ChannelshiftConfig;
/// use channelshift_core::engine::spawn_timeshift_engine;
/// use channelshift_core::pipeline::{FfmpegIngest, FileTailPlayback, RenderTarget};
///
/// let handle = spawn_timeshift_engine(
///     ChannelshiftConfig::default(),
///     FfmpegIngest::new(),
///     FileTailPlayback::new(),
///     RenderTarget::headless(),
/// );
/// handle
///     .start("http://tv.example/live/1.ts".parse().unwrap())
///     .await
///     .unwrap();
/// # }
/// ```
pub fn spawn_timeshift_engine<I, P>(
    config: ChannelshiftConfig,
    ingest: I,
    playback: P,
    render_target: RenderTarget,
) -> TimeshiftEngineHandle
where
    I: MediaPipeline + 'static,
    P: MediaPipeline + 'static,
{
    if config.timeshift.sweep_on_start {
        let removed = sweep_stale_buffers(&config.timeshift.scratch_dir);
        if removed > 0 {
            tracing::info!("Removed {} stale timeshift buffers", removed);
        }
    }

    let (sender, receiver) = mpsc::channel(100);
    let (signal_sender, signal_receiver) = mpsc::unbounded_channel();
    let (notice_sender, notice_receiver) = mpsc::unbounded_channel();
    let (status_sender, status_receiver) = watch::channel(TimeshiftStatus::default());

    let controller = DualPipelineController::new(
        Box::new(ingest),
        Box::new(playback),
        render_target.clone(),
        config.ingest.clone(),
        config.playback.clone(),
    );
    let engine = TimeshiftEngine::new(
        config.timeshift,
        controller,
        signal_sender,
        notice_sender,
        status_sender,
    );

    tokio::spawn(async move {
        run_actor_loop(engine, receiver, signal_receiver, notice_receiver).await;
    });

    TimeshiftEngineHandle::new(sender, status_receiver, render_target)
}

/// Runs the main actor message processing loop.
///
/// Processes one message at a time until a shutdown command arrives or every
/// handle has been dropped. In both cases the current session is stopped, its
/// buffer deleted and the scratch directory released before the loop exits.
async fn run_actor_loop(
    mut engine: TimeshiftEngine,
    mut receiver: mpsc::Receiver<TimeshiftCommand>,
    mut signal_receiver: mpsc::UnboundedReceiver<TimeshiftCommand>,
    mut notice_receiver: mpsc::UnboundedReceiver<PipelineNotice>,
) {
    tracing::debug!("Timeshift engine actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(command) => {
                    if !handle_command(&mut engine, command).await {
                        break;
                    }
                }
                None => {
                    tracing::debug!("All engine handles dropped");
                    engine.shutdown().await;
                    break;
                }
            },
            Some(command) = signal_receiver.recv() => {
                if !handle_command(&mut engine, command).await {
                    break;
                }
            }
            Some(notice) = notice_receiver.recv() => {
                engine.on_pipeline_notice(notice).await;
            }
        }
    }

    tracing::debug!("Timeshift engine actor stopped");
}

/// Handles a single command for the timeshift engine.
/// Returns true to continue processing, false to shutdown.
async fn handle_command(engine: &mut TimeshiftEngine, command: TimeshiftCommand) -> bool {
    match command {
        TimeshiftCommand::Start { url, responder } => {
            engine.start(url).await;
            let _ = responder.send(());
        }

        TimeshiftCommand::Pause { responder } => {
            engine.pause().await;
            let _ = responder.send(());
        }

        TimeshiftCommand::Resume { responder } => {
            engine.resume().await;
            let _ = responder.send(());
        }

        TimeshiftCommand::StopAndDelete { responder } => {
            engine.stop_and_delete().await;
            let _ = responder.send(());
        }

        TimeshiftCommand::Shutdown { responder } => {
            tracing::debug!("Timeshift engine actor shutting down");
            engine.shutdown().await;
            let _ = responder.send(());
            return false;
        }

        TimeshiftCommand::BufferSignal { session_id, signal } => {
            engine.on_buffer_signal(session_id, signal).await;
        }
    }
    true
}
