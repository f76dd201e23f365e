//! # Tally API server
//!
//! ```text
//! config ─► SQLite (migrations + reference data) ─► AppState ─► axum
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_api::{build_app, AppState, ServerConfig};
use tally_db::seed::seed_reference_data;
use tally_db::{Database, DbConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tally_api=debug,tower_http=info")),
        )
        .with_target(true)
        .init();

    info!("Starting Tally API server...");

    let config = ServerConfig::load().context("loading configuration")?;
    info!(
        bind_addr = %config.server.bind_addr,
        db_path = %config.database.path.display(),
        lock_timeout_ms = config.pos.lock_timeout_ms,
        decimal_scale = config.pos.decimal_scale,
        "Configuration loaded"
    );

    let db_config = DbConfig::new(config.database.path.clone())
        .max_connections(config.database.max_connections)
        .lock_timeout(config.lock_timeout());
    let db = Database::new(db_config)
        .await
        .context("opening database")?;
    seed_reference_data(&db)
        .await
        .context("seeding reference data")?;
    info!("Database ready");

    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState::new(db.clone(), config)?);
    let app = build_app(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    info!(addr = %bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
