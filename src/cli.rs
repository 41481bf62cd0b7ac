//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_EEW_URL, DEFAULT_REPORT_URL, EngineConfig};
use crate::models::Coordinate;
use crate::output::Format;

/// Live earthquake reports and early warnings for Japan.
#[derive(Parser, Debug)]
#[command(name = "quakewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow both live feeds in the terminal
    Live(LiveArgs),

    /// Serve render frames over HTTP (SSE)
    Serve(ServeArgs),

    /// Play an early-warning scenario through the engine
    Simulate(SimulateArgs),

    /// Resolve place names against the built-in gazetteer
    Locate(LocateArgs),
}

/// Engine settings shared by every command that runs one.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Finalized-report websocket endpoint
    #[arg(long, env = "QUAKEWATCH_REPORT_URL", default_value = DEFAULT_REPORT_URL)]
    pub report_url: String,

    /// Early-warning websocket endpoint
    #[arg(long, env = "QUAKEWATCH_EEW_URL", default_value = DEFAULT_EEW_URL)]
    pub eew_url: String,

    /// Seconds to wait before reconnecting a dropped feed
    #[arg(long, default_value = "5")]
    pub reconnect_delay: u64,

    /// Seconds of silence before a non-final alert is dropped
    #[arg(long, default_value = "20")]
    pub inactivity_window: u64,

    /// Seconds a final alert stays displayed
    #[arg(long, default_value = "180")]
    pub final_hold: u64,

    /// Wave animation frame interval in milliseconds
    #[arg(long, default_value = "16", value_parser = clap::value_parser!(u64).range(1..))]
    pub frame_ms: u64,

    /// Viewport padding as a fraction of its size
    #[arg(long, default_value = "0.1", value_parser = parse_padding)]
    pub padding: f64,

    /// Observer location for S-wave countdown: lat,lon
    #[arg(long, value_parser = parse_coordinate)]
    pub observer: Option<Coordinate>,
}

impl EngineArgs {
    /// Overlay these arguments on the built-in defaults.
    #[must_use]
    pub fn to_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.feeds.report_url.clone_from(&self.report_url);
        config.feeds.eew_url.clone_from(&self.eew_url);
        config.feeds.reconnect_delay = Duration::from_secs(self.reconnect_delay);
        config.eew.inactivity_window = Duration::from_secs(self.inactivity_window);
        config.eew.final_hold = Duration::from_secs(self.final_hold);
        config.wave.frame_interval = Duration::from_millis(self.frame_ms);
        config.viewport.padding = self.padding;
        config.observer = self.observer;
        config
    }
}

/// Arguments for the `live` command.
#[derive(Parser, Debug)]
pub struct LiveArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Also emit viewport and wave frames (JSON formats only)
    #[arg(long)]
    pub frames: bool,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Port to listen on
    #[arg(long, short = 'p', default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

/// Arguments for the `simulate` command.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// NDJSON file of early-warning frames (built-in scenario if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Seconds between scenario frames
    #[arg(long, default_value = "3")]
    pub interval: u64,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `locate` command.
#[derive(Parser, Debug)]
pub struct LocateArgs {
    /// Place names to resolve
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Parse an output format from string.
fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}

/// Parse a `lat,lon` pair.
fn parse_coordinate(s: &str) -> Result<Coordinate, String> {
    s.parse()
}

/// Parse a padding fraction in `[0, 0.5)`.
fn parse_padding(s: &str) -> Result<f64, String> {
    let padding: f64 = s.parse().map_err(|_| format!("invalid padding: {s}"))?;
    if (0.0..0.5).contains(&padding) {
        Ok(padding)
    } else {
        Err(format!("padding must be in [0, 0.5): {s}"))
    }
}
