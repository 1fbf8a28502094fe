use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use nvmtrace::board::{self, BoardConfig};
use nvmtrace::config::EngineConfig;
use nvmtrace::engine::Engine;

/// High-frequency multi-tier telemetry sampler for Jetson-class boards.
#[derive(Parser)]
#[command(name = "nvmtrace", about)]
struct Cli {
    /// Trace output path.
    #[arg(short, long, default_value = "trace.nvmt")]
    output: PathBuf,

    /// Board catalog entry to use (agx_orin, orin_nx). Default: auto-detect.
    #[arg(long, conflicts_with = "board_file")]
    board: Option<String>,

    /// Custom board definition as a YAML file.
    #[arg(long)]
    board_file: Option<PathBuf>,

    /// Recording duration in seconds.
    #[arg(short, long, default_value_t = 10.0)]
    duration_secs: f64,

    /// Fast-tier sampling rate in Hz.
    #[arg(long, default_value_t = 1000)]
    fast_hz: u32,

    /// Medium-tier sampling rate in Hz.
    #[arg(long, default_value_t = 100)]
    medium_hz: u32,

    /// Slow-tier sampling rate in Hz.
    #[arg(long, default_value_t = 10)]
    slow_hz: u32,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("nvmtrace {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let board = resolve_board(&cli)?;

    tracing::info!(
        board = %board.board_name,
        output = %cli.output.display(),
        duration_secs = cli.duration_secs,
        "starting recording",
    );

    let config = EngineConfig {
        fast_hz: cli.fast_hz,
        medium_hz: cli.medium_hz,
        slow_hz: cli.slow_hz,
    };

    let mut engine = Engine::new(&cli.output, board, config).context("building engine")?;

    engine.start().context("starting engine")?;
    engine.wait_for_warmup();
    tracing::info!(samples = engine.sample_count(), "warmup complete");

    std::thread::sleep(Duration::from_secs_f64(cli.duration_secs.max(0.0)));

    engine.stop().context("stopping engine")?;
    tracing::info!(
        samples = engine.sample_count(),
        output = %cli.output.display(),
        "recording finished",
    );

    Ok(())
}

/// Picks the board config: explicit catalog name, YAML file, or auto-detect.
fn resolve_board(cli: &Cli) -> Result<BoardConfig> {
    if let Some(name) = &cli.board {
        return board::board_config(name);
    }

    if let Some(path) = &cli.board_file {
        return BoardConfig::load(path);
    }

    board::detect().context("auto-detecting board (pass --board or --board-file to override)")
}
