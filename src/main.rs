//! Ledger service - main application entry point.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Wire store, transfer engine and account service
//! 5. Serve HTTP until Ctrl-C

use bank_ledger::{
    config, db,
    routes::{self, AppState},
    services::{account_service::AccountService, transfer_engine::TransferEngine},
    store::PgLedgerStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG, defaults to "info"
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = PgLedgerStore::new(pool.clone()).with_lock_timeout(config.lock_timeout());
    let engine = TransferEngine::new(store).with_timeout(config.transfer_timeout());
    let accounts = AccountService::new(engine).with_retry_policy(config.retry_policy());

    let app = routes::router(AppState { pool, accounts });

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
