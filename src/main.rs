//! stewardd - host management daemon entry point.
//!
//! Loads configuration (file, then environment, then CLI flags), wires the
//! daemon, and serves the HTTP surface until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use steward_core::daemon::Daemon;
use steward_core::{server, Config};

/// Host management daemon: tool dispatch, health, logs, maintenance.
#[derive(Debug, Parser)]
#[command(name = "stewardd", version, about)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(short, long, env = "STEWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 127.0.0.1:8080.
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(log_level) = cli.log_level {
        config.observability.log_level = log_level;
    }
    config.validate()?;

    steward_core::observability::init_tracing(&config.observability);

    let daemon = Arc::new(Daemon::new(config.clone())?);
    daemon.start();

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!("🚀 stewardd listening on {}", listener.local_addr()?);
    tracing::info!("  ✓ {} tools registered", daemon.dispatcher().len());
    tracing::info!(
        "  ✓ health monitor sampling every {:?}",
        config.health.check_interval
    );
    tracing::info!(
        "  ✓ log analyzer tailing {} sources",
        config.log_analysis.watch_paths.len()
    );
    tracing::info!(
        "  ✓ maintenance running every {:?}",
        config.maintenance.cleanup_interval
    );

    server::serve(daemon.clone(), listener, shutdown_signal()).await?;

    daemon.shutdown().await;
    Ok(())
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown_signal_received");
}
