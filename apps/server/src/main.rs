//! mpdweb server - web front end backend for MPD.
//!
//! Connects to an MPD server, watches it for player changes and serves the
//! change stream over SSE together with a command proxy and the current
//! cover image.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mpdweb_core::{
    bootstrap_services, start_server, CoverStore, Lifecycle, MpdClient, ServerLifecycle,
    ShutdownOutcome,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// mpdweb server - MPD web client with live player updates.
#[derive(Parser, Debug)]
#[command(name = "mpdweb-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MPDWEB_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Port to serve on (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// MPD server address as host:port (overrides config file).
    #[arg(short = 'm', long = "mpd-conn", value_name = "ADDR")]
    mpd_conn: Option<String>,

    /// Where to store the current cover image (overrides config file).
    #[arg(long, value_name = "FILE")]
    cover_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("mpdweb server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(addr) = args.mpd_conn {
        config.mpd_addr = addr;
    }
    if let Some(path) = args.cover_path {
        config.cover_path = Some(path);
    }

    log::info!(
        "Configuration: bind_port={}, mpd_addr={}",
        config.bind_port,
        config.mpd_addr
    );

    let covers = match &config.cover_path {
        Some(path) => CoverStore::new(path),
        None => CoverStore::in_temp_dir(),
    };
    log::info!("Storing cover at {}", covers.path().display());

    // One connection for proxied commands, one the watcher can park in `idle`
    let daemon = MpdClient::connect(config.mpd_addr.as_str())
        .await
        .with_context(|| format!("Failed to connect to MPD at {}", config.mpd_addr))?;
    let watch_daemon = MpdClient::connect(config.mpd_addr.as_str())
        .await
        .with_context(|| format!("Failed to connect to MPD at {}", config.mpd_addr))?;
    log::info!("Connected to MPD at {}", daemon.addr());

    // Bootstrap services
    let grace = config.core.shutdown_grace();
    let services = bootstrap_services(
        config.core,
        Arc::new(daemon),
        Arc::new(watch_daemon),
        Arc::new(covers),
    )
    .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // A fatal condition in any background task cancels `root`
    let root = CancellationToken::new();
    let lifecycle = Arc::new(ServerLifecycle::new(root.clone()));

    services
        .start_background_tasks(Arc::clone(&lifecycle) as Arc<dyn Lifecycle>)
        .await;

    // Spawn HTTP server
    let http_shutdown = CancellationToken::new();
    let server_handle = {
        let app_state = services.app_state();
        let port = config.bind_port;
        let http_shutdown = http_shutdown.clone();
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move {
            if let Err(e) = start_server(app_state, port, http_shutdown).await {
                lifecycle.request_shutdown(&format!("HTTP server failed: {e}"));
            }
        })
    };

    // Wait for shutdown signal or a fatal condition
    tokio::select! {
        _ = shutdown_signal() => log::info!("Shutdown signal received, cleaning up..."),
        _ = root.cancelled() => log::warn!("Fatal condition, cleaning up..."),
    }

    // Graceful shutdown: watcher and broker first, which ends every session,
    // then the HTTP server, all within one grace window
    let outcome = services
        .shutdown_with_server(grace, &http_shutdown, server_handle)
        .await;

    if outcome == ShutdownOutcome::TimedOut {
        log::warn!("Shutdown did not finish within {:?}, exiting anyway", grace);
    }

    if let Some(reason) = lifecycle.fatal_reason() {
        return Err(anyhow!(reason));
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
