//! # ReviewDesk Entry Point
//!
//! `reviewdesk` (or `reviewdesk serve`) runs the API; `migrate` and `seed`
//! prepare the database and exit.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use reviewdesk::{
    ai::GatewayAiClient,
    config::{AppConfig, ConfigLoader},
    connectors::Registry,
    crypto::CryptoKey,
    db,
    seeds::seed_sources,
    server::{AppState, run_server},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "reviewdesk", version, about = "Review management API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Apply pending database migrations
    Migrate,
    /// Insert or refresh the review platform catalog
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    config.validate().context("validating configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Configuration loaded");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            db::run_migrations(&db).await?;
            tracing::info!("Migrations applied");
        }
        Command::Seed => {
            db::run_migrations(&db).await?;
            seed_sources(&db).await?;
        }
        Command::Serve => serve(config, db).await?,
    }

    Ok(())
}

async fn serve(config: AppConfig, db: sea_orm::DatabaseConnection) -> anyhow::Result<()> {
    db::run_migrations(&db).await?;
    seed_sources(&db).await?;

    let key_bytes = config
        .crypto_key
        .clone()
        .context("REVIEWDESK_CRYPTO_KEY is required to serve")?;
    let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;
    let registry = Registry::from_config(&config);
    let ai = GatewayAiClient::from_config(&config).context("initializing AI client")?;

    let state = AppState::new(Arc::new(config), db, crypto_key, registry, Arc::new(ai));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                signal.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "Unable to listen for shutdown signal"),
        }
    });

    run_server(state, shutdown)
        .await
        .map_err(|err| anyhow::anyhow!("server error: {err}"))
}
