//! hostgate: hostname-routing reverse proxy for game servers.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                  Registry                     │
//!                      │                                               │
//!   Client ───────────▶│  Multiplexer :25565 ──▶ a.example.com ──┐     │
//!   (handshake with    │                    └──▶ b.example.com ──┼─────┼──▶ Backend
//!    virtual hostname) │  Multiplexer :25566 ──▶ c.example.com ──┘     │
//!                      │                                               │
//!                      │  ┌─────────────────────────────────────────┐ │
//!                      │  │ route files ─▶ watcher ─▶ reconcile     │ │
//!                      │  │ logging fan-out · metrics · signals     │ │
//!                      │  └─────────────────────────────────────────┘ │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostgate::lifecycle::{self, ConfigReloader, Shutdown};
use hostgate::observability::{metrics, LogOutput, Logger};
use hostgate::routing::Registry;

#[derive(Parser, Debug)]
#[command(name = "hostgate")]
#[command(about = "Routes game connections to backends by requested hostname", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, env = "HOSTGATE_DEBUG")]
    debug: bool,

    /// Colorize console output
    #[arg(long, env = "HOSTGATE_COLOR", default_value_t = true, action = ArgAction::Set)]
    color: bool,

    /// Directory holding one route file per hostname
    #[arg(short, long, env = "HOSTGATE_CONFIG_PATH", default_value = "./configs")]
    config_path: PathBuf,

    /// Also write JSON log lines to this file
    #[arg(long, env = "HOSTGATE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "HOSTGATE_METRICS_ADDRESS")]
    metrics_address: Option<SocketAddr>,

    /// Concurrent connection limit per listen address
    #[arg(long, env = "HOSTGATE_MAX_CONNECTIONS", default_value_t = 10_000)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.debug { LevelFilter::DEBUG } else { LevelFilter::INFO };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hostgate={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(cli.color))
        .init();

    tracing::info!(
        config_path = %cli.config_path.display(),
        max_connections = cli.max_connections,
        "hostgate v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if let Some(addr) = cli.metrics_address {
        metrics::init_metrics(addr)?;
    }

    let registry = Arc::new(
        Registry::new()
            .with_max_connections(cli.max_connections)
            .with_logger(Logger::new(level)),
    );
    if let Some(path) = &cli.log_file {
        registry.add_logger_output(LogOutput::file(path)?);
    }

    let started = lifecycle::start(&registry, &cli.config_path)?;
    let _watcher = started.watcher;

    let shutdown = Shutdown::new();
    let reloader = ConfigReloader::new(registry.clone(), started.bindings, started.events);
    let reload_task = tokio::spawn(reloader.run(shutdown.subscribe()));

    let mut serving = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.serve().await })
    };

    let finished = tokio::select! {
        signal = lifecycle::wait_for_shutdown_signal() => {
            tracing::info!(signal = signal?, "Shutdown signal received");
            None
        }
        // Every multiplexer stopped on its own.
        result = &mut serving => Some(result),
    };
    let served = match finished {
        Some(result) => result,
        None => {
            registry.close();
            serving.await
        }
    };

    tracing::debug!(tasks = shutdown.receiver_count(), "Stopping background tasks");
    shutdown.trigger();
    let _ = reload_task.await;
    match served {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Registry stopped with error"),
        Err(e) => tracing::error!(error = %e, "Registry task failed"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
