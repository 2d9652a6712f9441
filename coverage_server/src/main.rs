//! Centrix Coverage Server: build tracking and coverage rollup.
//!
//! A standalone binary that receives per-job coverage reports from CI
//! services, groups them into numbered builds per project, chains builds on
//! the same branch, and keeps each project's headline coverage current.

mod config;
mod error;
mod metrics;
mod migration;
mod models;
mod routes;
mod schema;
mod services;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::services::cascade::CascadeUpdater;
use crate::services::pipeline::BuildPipeline;
use crate::store::pg::{create_pool, PgStore};

#[derive(Parser)]
#[command(name = "coverage-server", about = "Centrix Coverage Server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "COV_PORT", default_value = "9090")]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting Centrix Coverage Server...");

    let cov_config = config::CoverageConfig::from_env();
    let pool = create_pool(&cli.database_url, cov_config.max_connections)?;

    // Run coverage migration (creates cov_* tables)
    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        tracing::info!("Running coverage migration...");
        migration::run_migration(&mut conn).await?;
        tracing::info!("Coverage migration completed.");
    }

    let store = PgStore::new(pool);
    let pipeline = BuildPipeline::new(
        store.clone(),
        store.clone(),
        CascadeUpdater::from_config(&cov_config),
    );

    let state = routes::CoverageRouterState {
        pipeline: Arc::new(pipeline),
        store,
        config: cov_config,
    };

    let app = Router::new()
        .nest("/coverage", routes::coverage_router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        );

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Centrix Coverage Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
