//! Database migration runner for SplitLedger.
//!
//! Usage:
//!   migrator [up]    - Run all pending migrations
//!   migrator down    - Rollback last migration
//!   migrator status  - Show migration status
//!   migrator fresh   - Drop all tables and re-run migrations
//!
//! The database comes from the same configuration as the server
//! (`SPLITLEDGER__DATABASE__URL` or `config/*.toml`).

use anyhow::{Context, bail};
use sea_orm_migration::MigratorTrait;
use splitledger_db::{connect_with, migration::Migrator};
use splitledger_shared::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sea_orm_migration=info,migrator=info".into()),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let Some(url) = config.database.url.as_deref() else {
        bail!("database.url is not configured");
    };
    let db = connect_with(url, &config.database).await?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    match command.as_str() {
        "up" => Migrator::up(&db, None).await?,
        "down" => Migrator::down(&db, Some(1)).await?,
        "status" => Migrator::status(&db).await?,
        "fresh" => Migrator::fresh(&db).await?,
        other => bail!("Unknown command '{other}', expected up, down, status or fresh"),
    }

    info!(command = %command, "Migration command finished");
    Ok(())
}
