//! Skylink Daemon - Frame Relay Server
//!
//! Accepts vehicles, simulators and ground stations over TCP and UDP and
//! relays their frames through one shared message bus. When `[transport]`
//! names a connection, the daemon also dials out to that peer (the uplink)
//! and keeps the link up with the configured reconnect settings.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config (~/.config/skylink/skylink.toml)
//! skylink-daemon
//!
//! # With config file
//! skylink-daemon --config /etc/skylink/skylink.toml
//!
//! # TCP only
//! skylink-daemon --no-udp
//!
//! # Listeners only, even if an uplink is configured
//! skylink-daemon --no-uplink
//!
//! # Verbose logging
//! RUST_LOG=debug skylink-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use server::{RelayServer, Services};

/// Skylink Daemon - frame relay between vehicles and ground stations
#[derive(Parser, Debug)]
#[command(name = "skylink-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SKYLINK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SKYLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Do not start the TCP listener
    #[arg(long)]
    no_tcp: bool,

    /// Do not start the UDP listener
    #[arg(long)]
    no_udp: bool,

    /// Do not dial the configured uplink
    #[arg(long)]
    no_uplink: bool,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("skylink_daemon={level},skylink_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Flip `shutdown` on the first termination signal
#[cfg(unix)]
fn spawn_signal_handler(shutdown: watch::Sender<bool>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        shutdown.send_replace(true);
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handler(shutdown: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        info!("Received ctrl-c, initiating shutdown");
        shutdown.send_replace(true);
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Skylink Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = match args.config {
        Some(ref path) => {
            info!(config_path = ?path, "Config file");
            skylink_core::load_config_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => skylink_core::load_config().context("Failed to load config")?,
    };

    let services = Services {
        tcp: !args.no_tcp,
        udp: !args.no_udp,
        uplink: !args.no_uplink,
    };
    let mut server = RelayServer::new(config, services)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx)?;

    let result = server.run(shutdown_rx).await;

    info!("Shutting down...");
    match result {
        Ok(()) => {
            info!("Skylink daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
