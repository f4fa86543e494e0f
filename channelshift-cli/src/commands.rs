//! CLI command implementations

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use channelshift_core::config::ChannelshiftConfig;
use channelshift_core::pipeline::{PlayerSurface, RenderTarget};
use channelshift_core::timeshift::sweep_stale_buffers;
use channelshift_core::{
    TimeshiftEngineHandle, TimeshiftStatus, spawn_production_engine, spawn_simulated_engine,
};
use clap::Subcommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use url::Url;

/// Player window title; the engine may be retuned, so it names no channel
const PLAYER_TITLE: &str = "channelshift";

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Watch a live stream with pause and resume
    Watch {
        /// Stream URL (http, https, udp, rtp, ...)
        url: Url,
        /// Generate synthetic data instead of reading the network
        #[arg(long)]
        simulate: bool,
        /// Do not open a player window
        #[arg(long)]
        headless: bool,
        /// Directory for buffer files
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        /// Bytes to buffer before playback starts
        #[arg(long)]
        min_ready_bytes: Option<u64>,
        /// Give up if the buffer is not ready within this many seconds
        #[arg(long)]
        startup_timeout: Option<u64>,
    },
    /// Remove buffer files left behind by earlier runs
    Sweep {
        /// Directory for buffer files
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Watch {
            url,
            simulate,
            headless,
            scratch_dir,
            min_ready_bytes,
            startup_timeout,
        } => {
            let mut config = ChannelshiftConfig::from_env();
            if let Some(dir) = scratch_dir {
                config.timeshift.scratch_dir = dir;
            }
            if let Some(bytes) = min_ready_bytes {
                config.timeshift.min_ready_bytes = bytes;
            }
            if let Some(seconds) = startup_timeout {
                config.timeshift.startup_timeout = Some(Duration::from_secs(seconds));
            }
            watch(config, url, simulate, headless).await
        }
        Commands::Sweep { scratch_dir } => {
            let dir = scratch_dir.unwrap_or(ChannelshiftConfig::from_env().timeshift.scratch_dir);
            let removed = sweep_stale_buffers(&dir);
            println!("Removed {removed} stale buffer(s) from {}", dir.display());
            Ok(())
        }
    }
}

/// Command typed on stdin while watching
#[derive(Debug, PartialEq, Eq)]
enum WatchCommand {
    Pause,
    Resume,
    Tune(Url),
    Status,
    Stop,
    Quit,
}

fn parse_watch_command(line: &str) -> anyhow::Result<WatchCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some("pause" | "p") => WatchCommand::Pause,
        Some("resume" | "r") => WatchCommand::Resume,
        Some("tune" | "t") => {
            let Some(url) = words.next() else {
                bail!("usage: tune <url>");
            };
            WatchCommand::Tune(Url::parse(url).with_context(|| format!("invalid URL {url}"))?)
        }
        Some("status" | "s") => WatchCommand::Status,
        Some("stop") => WatchCommand::Stop,
        Some("quit" | "q" | "exit") => WatchCommand::Quit,
        Some(other) => bail!("unknown command {other}"),
        None => bail!("empty command"),
    };
    Ok(command)
}

fn render_target_for(config: &ChannelshiftConfig, headless: bool) -> RenderTarget {
    if headless {
        RenderTarget::headless()
    } else {
        RenderTarget::new(PlayerSurface::new(
            config.playback.player_path.clone(),
            PLAYER_TITLE,
        ))
    }
}

fn describe(status: &TimeshiftStatus) -> String {
    match (status.state.error_message(), &status.source_url) {
        (Some(message), _) => format!("[error] {message}"),
        (None, Some(url)) => format!("[{}] {url}", status.state.label()),
        (None, None) => format!("[{}]", status.state.label()),
    }
}

async fn watch(
    config: ChannelshiftConfig,
    url: Url,
    simulate: bool,
    headless: bool,
) -> anyhow::Result<()> {
    let render_target = render_target_for(&config, headless);

    info!(
        "Buffering into {} (playback after {} bytes)",
        config.timeshift.scratch_dir.display(),
        config.timeshift.min_ready_bytes
    );
    let handle = if simulate {
        spawn_simulated_engine(config, render_target)
    } else {
        spawn_production_engine(config, render_target)
    };

    let mut updates = handle.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let line = describe(&updates.borrow_and_update());
            println!("{line}");
        }
    });

    handle.start(url).await?;
    println!("Commands: pause, resume, tune <url>, status, stop, quit");

    let result = run_command_loop(&handle).await;
    handle.shutdown().await?;
    result
}

async fn run_command_loop(handle: &TimeshiftEngineHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_watch_command(&line) {
            Ok(WatchCommand::Pause) => handle.pause().await?,
            Ok(WatchCommand::Resume) => handle.resume().await?,
            Ok(WatchCommand::Tune(url)) => handle.start(url).await?,
            Ok(WatchCommand::Status) => {
                println!("{}", serde_json::to_string_pretty(&handle.status())?);
                println!("buffered: {} bytes", handle.buffered_bytes());
            }
            Ok(WatchCommand::Stop) => handle.stop_and_delete().await?,
            Ok(WatchCommand::Quit) => return Ok(()),
            Err(e) => warn!("{e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_title_does_not_name_the_channel() {
        let config = ChannelshiftConfig::default();

        assert_eq!(render_target_for(&config, false).name(), "channelshift");
        assert_eq!(render_target_for(&config, true).name(), "null");
    }

    #[test]
    fn test_parse_watch_commands() {
        assert_eq!(parse_watch_command("pause").unwrap(), WatchCommand::Pause);
        assert_eq!(parse_watch_command("  r ").unwrap(), WatchCommand::Resume);
        assert_eq!(
            parse_watch_command("tune udp://239.0.0.1:1234").unwrap(),
            WatchCommand::Tune(Url::parse("udp://239.0.0.1:1234").unwrap())
        );
        assert_eq!(parse_watch_command("q").unwrap(), WatchCommand::Quit);
        assert!(parse_watch_command("tune").is_err());
        assert!(parse_watch_command("tune not a url").is_err());
        assert!(parse_watch_command("rewind").is_err());
    }

    #[test]
    fn test_describe_status() {
        let status = TimeshiftStatus {
            source_url: Some(Url::parse("http://tv.example/1.ts").unwrap()),
            ..TimeshiftStatus::default()
        };
        assert_eq!(describe(&status), "[idle] http://tv.example/1.ts");
    }
}
