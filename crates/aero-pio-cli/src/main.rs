#![forbid(unsafe_code)]

use std::time::Duration;

use aero_pio::{
    Board, ConsoleSink, DiagnosticSink, LaneConfig, RunConfig, StatusPolicy, TracingSink,
    WaitMode,
};
use anyhow::{Context, Result};
use clap::Parser;

/// Drives the lane event supervisor on a free-running emulated board.
///
/// Defaults come from `AERO_PIO_*` environment variables; flags override them.
#[derive(Debug, Parser)]
#[command(name = "aero-pio", version)]
struct Args {
    /// Number of lanes.
    #[arg(long)]
    lanes: Option<u8>,

    /// Width of the IRQ flag register in bits.
    #[arg(long)]
    status_bits: Option<u8>,

    /// How the interrupt handler publishes flags: `overwrite` or `accumulate`.
    #[arg(long)]
    policy: Option<StatusPolicy>,

    /// How the supervisor waits for an event: `spin` or `park`.
    #[arg(long)]
    wait: Option<WaitMode>,

    /// Delay after each trigger, in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Stop after this many round-robin passes. Runs forever when unset.
    #[arg(long)]
    cycles: Option<u64>,

    /// Fail if a lane raises no event within this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Emulated clock period in microseconds. 0 ticks as fast as possible.
    #[arg(long, default_value_t = 10)]
    tick_us: u64,

    /// Print the classic expected/actual IRQ flag lines to stdout instead of logging.
    #[arg(long)]
    console: bool,
}

impl Args {
    fn apply(&self, mut config: RunConfig) -> Result<RunConfig> {
        if self.lanes.is_some() || self.status_bits.is_some() {
            config.lanes = LaneConfig::new(
                self.lanes.unwrap_or(config.lanes.lane_count()),
                self.status_bits.unwrap_or(config.lanes.status_bit_width()),
            )
            .context("invalid lane configuration")?;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(wait) = self.wait {
            config.wait_mode = wait;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.cycle_delay = Duration::from_millis(delay_ms);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.wait_timeout = Some(Duration::from_millis(timeout_ms));
        }
        if self.cycles.is_some() {
            config.cycles = self.cycles;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.apply(RunConfig::from_env().context("invalid AERO_PIO_* environment")?)?;

    let sink: Box<dyn DiagnosticSink> = if args.console {
        Box::new(ConsoleSink::stdout())
    } else {
        Box::new(TracingSink)
    };

    run(&config, Duration::from_micros(args.tick_us), sink)
}

fn run(config: &RunConfig, tick: Duration, sink: Box<dyn DiagnosticSink>) -> Result<()> {
    let board = Board::from_config(config);
    let offset = board.bring_up().context("failed to bring up lanes")?;
    tracing::info!(
        offset,
        lanes = config.lanes.lane_count(),
        policy = %config.policy,
        wait = %config.wait_mode,
        "lanes running"
    );

    let running = board
        .start_with_interval(tick)
        .context("failed to start emulated clock")?;
    let mut supervisor = running.supervisor(config, sink);

    let outcome = match config.cycles {
        Some(cycles) => {
            let (mut triggers, mut mismatched) = (0u64, 0u64);
            let outcome = supervisor.run_cycles_with(cycles, |report| {
                triggers += 1;
                mismatched += u64::from(!report.matches());
            });
            tracing::info!(triggers, mismatched, "run complete");
            outcome
        }
        None => supervisor.run(),
    };

    let stats = running.board().status().stats();
    tracing::info!(
        invocations = stats.invocations,
        spurious = stats.spurious,
        masked = stats.masked,
        "interrupt handler stats"
    );

    outcome.context("supervisor stopped")?;
    running.halt().context("emulated clock failed")?;
    Ok(())
}
