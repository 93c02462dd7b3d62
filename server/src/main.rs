mod app;
mod config;
mod db;
mod db_migrations;
mod db_sqlx;
mod routes;
mod scheduler;
mod services;
mod state;
mod upstream;

extern crate self as sqlx;
pub use crate::db_sqlx::{
    Error, PgPool, Postgres, QueryBuilder, postgres, query, query_as, query_scalar,
};

use fameboard_shared::Region;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;
use crate::upstream::{Client, RegionLimiters};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::var(config::CONFIG_FILE_ENV)
        .unwrap_or_else(|_| config::DEFAULT_CONFIG_FILE.to_string());
    match dotenvy::from_path(&config_path) {
        Ok(()) => tracing::info!(path = %config_path, "loaded config file"),
        Err(e) if e.not_found() => {
            tracing::info!(path = %config_path, "no config file; using process environment")
        }
        Err(e) => {
            tracing::error!(error = %e, path = %config_path, "failed to load config file");
            return;
        }
    }

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("DATABASE_URL is required to run fameboard-server");
            return;
        }
    };
    let db_max_connections = config::db_max_connections();
    tracing::info!(db_max_connections, "Connecting to PostgreSQL...");
    let db = match PgPoolOptions::new()
        .max_connections(db_max_connections)
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to PostgreSQL");
            return;
        }
    };
    if let Err(e) = db_migrations::run(&db).await {
        tracing::error!(error = %e, "failed to run migrations");
        return;
    }
    tracing::info!("Database connected and migrations applied");

    // One rate-limiter set and one HTTP client, shared by every poller.
    let state = AppState::new(db, Client::new(RegionLimiters::new()));
    let cancel = CancellationToken::new();

    // Per-region ingestion pipelines.
    for region in Region::ALL {
        tokio::spawn(services::killboard_poller::run(
            state.clone(),
            region,
            cancel.child_token(),
        ));
        tokio::spawn(services::battleboard_poller::run(
            state.clone(),
            region,
            cancel.child_token(),
        ));
        tokio::spawn(services::battle_enricher::run(
            state.clone(),
            region,
            cancel.child_token(),
        ));
        tokio::spawn(services::player_poller::run(
            state.clone(),
            region,
            cancel.child_token(),
        ));
    }

    // Process-wide services.
    tokio::spawn(services::top_cache::run(state.clone(), cancel.child_token()));
    tokio::spawn(services::data_purger::run(state.clone(), cancel.child_token()));
    tokio::spawn(services::metrics_collector::run(
        state.clone(),
        cancel.child_token(),
    ));

    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::api_port());
    tracing::info!("fameboard server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    cancel.cancel();
    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    // Every poller loop selects on this token at its iteration boundary.
    cancel.cancel();
}
