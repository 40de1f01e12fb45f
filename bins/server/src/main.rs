//! SplitLedger API Server
//!
//! Main entry point for the SplitLedger backend service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use splitledger_api::{AppState, create_router};
use splitledger_core::ledger::LedgerService;
use splitledger_db::{PgLedgerStore, PgNotificationInbox, connect_with};
use splitledger_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "splitledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Pick the backing store
    let service = match config.database.url.as_deref() {
        Some(url) => {
            let db = connect_with(url, &config.database).await?;
            info!("Connected to database");

            let store = PgLedgerStore::new(
                db.clone(),
                Duration::from_millis(config.ledger.contention_timeout_ms),
            );
            LedgerService::new(
                Arc::new(store),
                Arc::new(PgNotificationInbox::new(db)),
                &config.ledger,
                &config.notifications,
            )
        }
        None => {
            warn!("No database URL configured, ledger data lives in memory only");
            LedgerService::in_memory(&config.ledger, &config.notifications)
        }
    };
    info!(
        currency = %config.ledger.currency,
        contention_timeout_ms = config.ledger.contention_timeout_ms,
        "Ledger service ready"
    );

    // Create router
    let app = create_router(AppState { service });

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
