//! Metronome Binary Entry Point
//!
//! Loads configuration, registers the built-in providers and runs the
//! collection loop until a signal arrives or the circuit breaker trips.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use metronome::{
    CadenceController, CircuitBreaker, CycleContext, DeliveryPipeline, InfluxSink, Orchestrator,
    PrintSink, Sink,
    config::AgentConfig,
    delivery::channel_capacity,
    provider::system::default_providers,
    scheduler::{Clock, initial_target},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Metronome - Fixed-Interval Telemetry Agent
#[derive(Parser, Debug)]
#[command(name = "metronome", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "METRONOME_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between collection cycles (overrides config file)
    #[arg(long, env = "METRONOME_COLLECT_INTERVAL")]
    collect_interval: Option<u64>,

    /// Consecutive failures before exiting, 0 for unlimited (overrides config file)
    #[arg(long, env = "METRONOME_MAX_CONSECUTIVE_ERRORS")]
    max_consecutive_errors: Option<u32>,

    /// Print batches to stdout instead of writing to the sink
    #[arg(long, env = "METRONOME_DRY_RUN")]
    dry_run: bool,

    /// Write the process id to this file while running (overrides config file)
    #[arg(long, env = "METRONOME_PIDFILE")]
    pidfile: Option<PathBuf>,

    /// InfluxDB base URL (overrides config file)
    #[arg(long, env = "METRONOME_SINK_URL")]
    sink_url: Option<String>,

    /// InfluxDB database (overrides config file)
    #[arg(long, env = "METRONOME_DATABASE")]
    database: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,metronome=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli)?;
    let interval = config.interval();

    tracing::info!(
        interval = ?interval,
        max_consecutive_errors = config.max_consecutive_errors,
        dry_run = config.dry_run,
        "Metronome starting"
    );

    let _pidfile = match &config.pidfile {
        Some(path) => Some(PidfileGuard::create(path)?),
        None => None,
    };

    // Register and initialise providers
    let mut orchestrator = Orchestrator::new();
    for provider in default_providers(&config.providers) {
        orchestrator.register(provider);
    }

    let clock = Clock::new();
    let init_ctx = CycleContext::new(initial_target(&clock, interval), interval, clock);
    if let Err(e) = orchestrator.initialise(&init_ctx).await {
        tracing::error!(error = %e, "Provider initialisation failed");
        return Ok(ExitCode::FAILURE);
    }

    // Delivery
    let sink: Box<dyn Sink> = if config.dry_run {
        tracing::info!("Dry run: printing batches to stdout");
        Box::new(PrintSink::stdout())
    } else {
        tracing::info!(
            url = %config.sink.url,
            database = %config.sink.database,
            "Writing to InfluxDB"
        );
        Box::new(InfluxSink::from_config(&config.sink))
    };
    let breaker = Arc::new(CircuitBreaker::new(config.max_consecutive_errors));
    let pipeline = DeliveryPipeline::spawn(sink, channel_capacity(interval), breaker.clone())?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let controller = CadenceController::with_clock(
        orchestrator,
        pipeline,
        breaker,
        interval,
        shutdown,
        clock,
    );
    let summary = controller.run().await;

    tracing::info!(
        cycles = summary.cycles,
        reason = ?summary.exit_reason,
        "Shutdown complete"
    );
    Ok(ExitCode::from(summary.exit_code() as u8))
}

/// Load the config file (or defaults) and apply CLI/env overrides.
///
/// Precedence: CLI > ENV > config file > defaults.
fn load_config(cli: Cli) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            AgentConfig::read(path)?
        }
        None => AgentConfig::default(),
    };

    if let Some(interval) = cli.collect_interval {
        config.collect_interval = interval;
    }
    if let Some(max) = cli.max_consecutive_errors {
        config.max_consecutive_errors = max;
    }
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(pidfile) = cli.pidfile {
        config.pidfile = Some(pidfile);
    }
    if let Some(url) = cli.sink_url {
        config.sink.url = url;
    }
    if let Some(database) = cli.database {
        config.sink.database = database;
    }

    Ok(config.finalize()?)
}

/// Holds the pidfile for the lifetime of the process.
struct PidfileGuard {
    path: PathBuf,
}

impl PidfileGuard {
    fn create(path: &Path) -> std::io::Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        tracing::debug!(path = %path.display(), "Pidfile written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidfileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pidfile");
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Finishing current cycle, then draining...");
    token.cancel();
}
