//! # AutoSend
//!
//! Queues short messages over HTTP and dispatches them to a delivery
//! endpoint on a fixed interval.
//!
//! Usage:
//!   autosend                          # Serve with ~/.autosend/config.toml
//!   autosend --config ./autosend.toml # Custom config file
//!   autosend --port 9090 --verbose    # Override port, debug logging

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use autosend_core::AutoSendConfig;
use autosend_gateway::AppState;
use autosend_scheduler::{DeliveryClient, DispatchOptions, DispatchScheduler};
use autosend_store::SqliteStore;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "autosend",
    version,
    about = "📨 AutoSend: automatic short-message dispatcher"
)]
struct Cli {
    /// Config file (default: ~/.autosend/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// API port (overrides config and AUTOSEND_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<AutoSendConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            AutoSendConfig::load_from(Path::new(&path))?
        }
        None => AutoSendConfig::load()?,
    };
    config.apply_env_overrides();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "autosend=debug,autosend_scheduler=debug,autosend_store=debug,autosend_gateway=debug,tower_http=debug"
    } else {
        "autosend=info,autosend_scheduler=info,autosend_store=info,autosend_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    let db_path = config.database.resolved_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );

    let client = DeliveryClient::new(&config.delivery)?;
    if config.delivery.auth_key.is_empty() {
        tracing::warn!("⚠️  No delivery auth key configured (AUTOSEND_DELIVERY_AUTH_KEY)");
    }
    tracing::info!("📡 Delivery endpoint: {}", client.url());

    let scheduler = Arc::new(DispatchScheduler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(client),
        DispatchOptions::from_config(&config.scheduler, &config.delivery),
    ));

    // Restart dispatch if it was active when the process last went down
    if config.scheduler.resume_on_boot {
        match scheduler.resume_if_active().await {
            Ok(true) => {}
            Ok(false) => tracing::info!("Scheduler was inactive; waiting for a start request"),
            Err(e) => tracing::error!("❌ Failed to resume scheduler: {e}"),
        }
    }

    println!("📨 AutoSend v{}", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(AppState {
        config,
        messages: store.clone(),
        cache: store.clone(),
        scheduler: scheduler.clone(),
        start_time: std::time::Instant::now(),
    });

    // Drain the scheduler before the listener closes
    let shutdown = async move {
        shutdown_signal().await;
        tracing::info!("🛑 Shutdown requested");
        match scheduler.shutdown().await {
            Ok(Some(_)) => tracing::info!("Scheduler stopped"),
            Ok(None) => {}
            Err(e) => tracing::error!("❌ Failed to stop scheduler: {e}"),
        }
    };

    autosend_gateway::serve(state, shutdown).await?;
    tracing::info!("👋 AutoSend exited");
    Ok(())
}
