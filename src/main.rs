/// Gatehouse - authentication and token issuance service
///
/// Password, OIDC and wallet-signature logins sharing one access/refresh
/// token model.

mod account;
mod api;
mod auth;
mod config;
mod context;
mod crypto;
mod db;
mod error;
mod metrics;
mod oidc;
mod server;
mod wallet;

use config::ServerConfig;
use context::AppContext;
use error::GateResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> GateResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Gatehouse v{} starting", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::from_env()?;
    tracing::info!("Database: {}", config.storage.database_path.display());
    tracing::debug!("Configured log level: {}", config.logging.level);

    // Create application context (validates config, runs migrations)
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}
