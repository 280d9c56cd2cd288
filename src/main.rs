//! Foundation gateway service.
//!
//! Runs the data-access reliability layer over an in-process document store:
//!
//! ```text
//!     caller ──▶ validator ──▶ cache ──hit──▶ caller
//!                               │ miss
//!                               ▼
//!                           limiter ──▶ circuit breaker ──▶ database
//!                                                             │
//!     caller ◀──────────── cache put ◀────────────────────────┘
//! ```
//!
//! Background tasks sweep expired cache entries and log health. SIGHUP or an
//! edit of the config file reloads validator rules; SIGINT/SIGTERM shut down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use foundation_gateway::config::watcher::ConfigWatcher;
use foundation_gateway::config::{load_config, GatewayConfig};
use foundation_gateway::gateway::MemoryDatabase;
use foundation_gateway::lifecycle::{Foundation, SignalEvent, SignalListener};
use foundation_gateway::observability::{logging, metrics};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "foundation-gateway")]
#[command(about = "Data-access reliability layer for a document database", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overriding `observability.log_level`.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability)?;

    if cli.check {
        tracing::info!(path = ?cli.config, "Configuration valid");
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "foundation-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut foundation = Foundation::build(config, Arc::new(MemoryDatabase::new()))?;
    foundation.start_background_tasks();

    // Keep the notify handle alive for the lifetime of the process.
    let (reloader, mut updates, _watch_handle) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = match watcher.clone().run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to watch config file, reload only via SIGHUP");
                    None
                }
            };
            (Some(watcher), Some(updates), handle)
        }
        None => (None, None, None),
    };

    let mut signals = SignalListener::new()?;
    loop {
        tokio::select! {
            event = signals.recv() => match event {
                SignalEvent::Shutdown => break,
                SignalEvent::Reload => match &reloader {
                    Some(watcher) => {
                        watcher.reload_now();
                    }
                    None => tracing::warn!("No config file given, nothing to reload"),
                },
            },
            Some(update) = next_update(&mut updates) => {
                let outcome = foundation.apply_config(update);
                tracing::info!(?outcome, "Configuration reload processed");
            }
        }
    }

    foundation.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn next_update(
    updates: &mut Option<mpsc::UnboundedReceiver<GatewayConfig>>,
) -> Option<GatewayConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
