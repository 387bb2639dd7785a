//! CLI entry point: load configuration, wire up logging, and run the supervisor until
//! SIGINT/SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use relaywatcher::config::Config;
use relaywatcher::shutdown::Shutdown;
use relaywatcher::supervisor::Supervisor;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relaywatcher", about = "Watches live streams, transcribes them, and relays transcripts")]
struct Args {
    /// Path to the worker's YAML configuration file.
    #[arg(default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relaywatcher::logging::init();

    let args = Args::parse();
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, path = %args.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        streamers = config.active_streamers().count(),
        relay_enabled = config.server.enabled,
        "relaywatcher starting"
    );

    let (shutdown, shutdown_signal) = Shutdown::new();
    let supervisor = Supervisor::new(config);

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_received().await;
        info!("signal received, shutting down");
        trigger.trigger();
    });

    supervisor.run(shutdown, shutdown_signal).await
}

/// Resolves on Ctrl+C or (on unix) SIGTERM.
async fn shutdown_signal_received() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
