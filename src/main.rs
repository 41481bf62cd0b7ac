//! quakewatch - live earthquake reports and early warnings for Japan.
//!
//! Follows a finalized-report feed and an early-warning feed over
//! websockets, reconciles early-warning refinements into one live alert,
//! and drives a map viewport and wave-propagation playback from them.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod cli;
mod config;
mod engine;
mod errors;
mod gazetteer;
mod ingest;
mod models;
mod output;
mod reconcile;
mod scenario;
mod server;
mod viewport;
mod wave;

use cli::{Cli, Command};
use engine::{Command as EngineCommand, DisplayMode, Engine, RenderFrame};
use gazetteer::Gazetteer;
use output::Format;

/// Capacity of the feed → engine channel.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Live(args) => block_on(cmd_live(args)),
        Command::Serve(args) => block_on(cmd_serve(args)),
        Command::Simulate(args) => block_on(cmd_simulate(args)),
        Command::Locate(args) => cmd_locate(&args),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(future)
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        token.cancel();
    });
}

/// Execute the `live` command - follow both feeds in the terminal.
async fn cmd_live(args: cli::LiveArgs) -> Result<()> {
    let config = args.engine.to_config();
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let feeds = ingest::spawn_feeds(&config.feeds, &tx, &shutdown);
    drop(tx);

    let (handle, engine) = Engine::new(config.clone(), Gazetteer::builtin()).spawn(rx, shutdown.clone());
    let frames = handle.subscribe();

    if args.format == Format::Human {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "\x1b[1m🌍 quakewatch live\x1b[0m")?;
        writeln!(out, "\x1b[2mReports: {}\x1b[0m", config.feeds.report_url)?;
        writeln!(out, "\x1b[2mEEW:     {} | Press Ctrl+C to stop\x1b[0m", config.feeds.eew_url)?;
        writeln!(out, "\x1b[2m─────────────────────────────────────────────────────────────────────\x1b[0m")?;
    }

    print_frames(frames, args.format, args.frames, shutdown.clone()).await?;

    shutdown.cancel();
    for feed in feeds {
        let _ = feed.await;
    }
    engine.await.context("engine task failed")?;
    Ok(())
}

/// Execute the `serve` command - HTTP surface.
async fn cmd_serve(args: cli::ServeArgs) -> Result<()> {
    let config = server::ServerConfig {
        port: args.port,
        host: args.host.clone(),
        engine: args.engine.to_config(),
    };

    let url = format!("http://{}:{}", args.host, args.port);
    println!("\x1b[1m🌍 quakewatch server\x1b[0m");
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("  Local:   \x1b[96m{url}\x1b[0m");
    println!("  Stream:  {url}/stream");
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("\x1b[2mPress Ctrl+C to stop\x1b[0m\n");

    server::run_server(config).await
}

/// Execute the `simulate` command - play a scenario in simulation mode.
async fn cmd_simulate(args: cli::SimulateArgs) -> Result<()> {
    let alerts = match &args.file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read scenario {}", path.display()))?;
            scenario::load(&text).context("failed to parse scenario")?
        }
        None => scenario::builtin(models::to_jst(chrono::Utc::now())),
    };
    anyhow::ensure!(!alerts.is_empty(), "scenario contains no early-warning frames");

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    // No feeds: the inbound side stays empty
    let (_tx, rx) = mpsc::channel(1);
    let (handle, engine) = Engine::new(args.engine.to_config(), Gazetteer::builtin()).spawn(rx, shutdown.clone());
    let frames = handle.subscribe();
    let printer = tokio::spawn(print_frames(frames, args.format, false, shutdown.clone()));

    handle.set_mode(DisplayMode::Simulation).await;
    info!(frames = alerts.len(), "playing scenario");

    let interval = Duration::from_secs(args.interval);
    for (i, alert) in alerts.into_iter().enumerate() {
        if i > 0 {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
        if !handle.send(EngineCommand::Simulate(Box::new(alert))).await {
            break;
        }
    }

    // Let the alert run out (or be interrupted). The last command may still
    // be queued, so first give it a chance to show up.
    let mut snapshots = handle.watch();
    let _ = tokio::time::timeout(Duration::from_secs(1), snapshots.wait_for(|s| s.eew.active)).await;
    tokio::select! {
        () = shutdown.cancelled() => {}
        _ = snapshots.wait_for(|s| !s.eew.active) => info!("scenario finished"),
    }

    shutdown.cancel();
    engine.await.context("engine task failed")?;
    printer.await.context("output task failed")??;
    Ok(())
}

/// Execute the `locate` command - gazetteer lookup.
fn cmd_locate(args: &cli::LocateArgs) -> Result<()> {
    let gazetteer = Gazetteer::builtin();
    let results: Vec<output::Located<'_>> = args
        .names
        .iter()
        .map(|name| output::Located::new(name, gazetteer.lookup(name)))
        .collect();

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    output::write_located(&mut handle, &results, args.format)?;
    Ok(())
}

/// Write render frames to stdout until `stop` fires or the engine goes away.
///
/// Viewport and wave frames are only written when `all_frames` is set,
/// except the human countdown, which is written once per second.
async fn print_frames(
    mut frames: broadcast::Receiver<RenderFrame>,
    format: Format,
    all_frames: bool,
    stop: CancellationToken,
) -> Result<()> {
    let mut last_countdown: Option<i64> = None;

    loop {
        let frame = tokio::select! {
            () = stop.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "output fell behind, frames skipped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let write = match (&frame, format) {
            (RenderFrame::Display(_), _) => true,
            (RenderFrame::Waves(waves), Format::Human) => {
                #[allow(clippy::cast_possible_truncation)]
                let second = waves.countdown.map(|c| c.s_remaining_secs.ceil() as i64);
                let changed = second.is_some() && second != last_countdown;
                last_countdown = second;
                changed
            }
            _ => all_frames,
        };
        if !write {
            continue;
        }

        let stdout = io::stdout();
        let mut handle = stdout.lock();
        output::write_frame(&mut handle, &frame, format)?;
        handle.flush()?;
    }
    Ok(())
}
