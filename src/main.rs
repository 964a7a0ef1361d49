//! PipeRelay — self-hosted webhook delivery service.
//!
//! Entry point: loads configuration, opens the store, starts the
//! delivery pool and the HTTP server, and coordinates graceful
//! shutdown. On SIGINT/SIGTERM the server stops accepting ingest,
//! in-flight deliveries drain within the shutdown grace, then the
//! store closes.

use std::sync::Arc;

use anyhow::{Context, Result};
use piperelay_api::{AppState, Config};
use piperelay_core::{Clock, SqliteStore, Store, SystemClock};
use piperelay_delivery::DeliveryPool;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!(version = VERSION, "starting PipeRelay");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory {}", parent.display()))?;
        }
    }

    let sqlite = SqliteStore::connect(&config.database_path, clock.clone())
        .await
        .context("failed to open storage")?;
    sqlite.migrate().await.context("failed to run migrations")?;
    info!(path = %config.database_path, "database ready");

    let store: Arc<dyn Store> = Arc::new(sqlite);

    let mut pool = DeliveryPool::new(store.clone(), config.to_pool_config(), clock.clone())
        .context("failed to build delivery pool")?;
    pool.start();

    let state = AppState::new(store.clone(), clock);
    let addr = config.server_addr()?;

    info!(
        %addr,
        workers = config.workers,
        "PipeRelay is running"
    );

    piperelay_api::start_server(state, &config, addr, shutdown_signal())
        .await
        .context("server error")?;

    info!("draining delivery workers");
    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "delivery pool did not stop cleanly");
    }

    store.close().await;
    info!("PipeRelay stopped");

    Ok(())
}

/// Initializes structured logging from the configured filter, with
/// `RUST_LOG` taking priority when set.
fn init_tracing(configured_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}
