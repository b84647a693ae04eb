use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use photo_restore::config::{Cli, Command, ServerConfig};
use photo_restore::http::{router, AppState};
use photo_restore::identity::UserId;
use photo_restore::model::ReplicateClient;
use photo_restore::seed::seed_cache;
use photo_restore::store::{SessionStore, SqliteStore};
use photo_restore::telemetry;

async fn serve(store: SqliteStore, config: ServerConfig) -> anyhow::Result<()> {
    if config.replicate_api_token.is_none() {
        tracing::warn!("REPLICATE_API_TOKEN is not set; only cached results can be served");
    }

    let model = ReplicateClient::new(
        reqwest::Client::new(),
        config.replicate_base_url.clone(),
        config.replicate_api_token.clone(),
    );
    let state = Arc::new(AppState::new(store, Arc::new(model), &config));
    let app = router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;

    tracing::info!(addr = %config.bind, "server running");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    let store = SqliteStore::open(&cli.database)
        .with_context(|| format!("open database {}", cli.database.display()))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(store, cli.server).await,
        Command::SeedCache { dir } => {
            let report = seed_cache(&store, &dir).await?;
            println!(
                "Cache seeding complete: {} seeded, {} skipped, {} failed",
                report.seeded, report.skipped, report.failed
            );
            Ok(())
        }
        Command::IssueToken { user } => {
            let token = store.issue(&UserId::new(user)).await?;
            println!("{token}");
            Ok(())
        }
    }
}
