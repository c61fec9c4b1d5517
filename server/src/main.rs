use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hall_server::attachments;
use hall_server::config::ServerConfig;
use hall_server::db::pool::{create_pool, run_migrations};
use hall_server::engine::purge::RoomPurger;
use hall_server::engine::relay::ChatRelay;
use hall_server::engine::sweeper::run_presence_sweeper;
use hall_server::web::app_state::AppState;
use hall_server::web::rate_limit::{ApiRateLimiters, run_limiter_pruner};
use hall_server::web::router::build_router;

/// Password-gated ephemeral group chat server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "hall.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let pool = create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let store = attachments::from_config(&config.attachments)
        .context("failed to set up attachment storage")?;
    let purger = RoomPurger::new(pool.clone(), store);
    let relay = Arc::new(ChatRelay::new(
        pool.clone(),
        purger,
        config.storage.max_message_length,
    ));

    let shutdown = CancellationToken::new();
    let limiters = Arc::new(ApiRateLimiters::default());

    let sweeper = tokio::spawn(run_presence_sweeper(
        pool.clone(),
        config.presence.sweep_interval(),
        config.presence.stale_timeout(),
        shutdown.clone(),
    ));
    tokio::spawn(run_limiter_pruner(limiters.clone(), shutdown.clone()));

    let web_addr = config.server.web_address.clone();
    let app_state = Arc::new(AppState {
        relay,
        db: pool.clone(),
        config,
        limiters,
        shutdown: shutdown.clone(),
    });
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;
    info!("Hall server listening on {}", web_addr);

    let signal = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
        signal.cancel();
    })
    .await
    .context("server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "presence sweeper task failed");
    }
    pool.close().await;
    info!("Hall server stopped");
    Ok(())
}
