/// Application context and dependency injection
use crate::{
    account::AccountManager,
    auth::{RefreshTokenStore, TokenService},
    config::ServerConfig,
    crypto::{password::PasswordHasher, signature::SignatureVerifiers},
    db,
    error::{GateError, GateResult},
    oidc::OidcClient,
    wallet::{EnvelopeVerifier, WalletAuthenticator, WalletStore},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub tokens: Arc<TokenService>,
    pub wallet_authenticator: Arc<WalletAuthenticator>,
    /// None when OIDC is not configured
    pub oidc: Option<Arc<OidcClient>>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> GateResult<Self> {
        config.validate()?;

        let db = db::create_pool(&config.storage.database_path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        Self::with_pool(config, db)
    }

    /// Wire every service onto an already migrated pool
    pub fn with_pool(config: ServerConfig, db: SqlitePool) -> GateResult<Self> {
        let auth = &config.authentication;

        let hasher = PasswordHasher::new(auth.bcrypt_cost)?;
        let tokens = TokenService::new(&auth.jwt_secret, auth.access_token_ttl);
        let refresh_ttl = chrono::Duration::from_std(auth.refresh_token_ttl)
            .map_err(|e| GateError::Config(format!("JWT_REFRESH_EXPIRY_SECS out of range: {}", e)))?;

        let account_manager = Arc::new(AccountManager::new(
            db.clone(),
            hasher,
            tokens.clone(),
            RefreshTokenStore::new(db.clone()),
            refresh_ttl,
        ));

        let wallet_authenticator = Arc::new(WalletAuthenticator::new(
            EnvelopeVerifier::new(
                SignatureVerifiers::with_defaults(),
                config.wallet.message_domain.clone(),
                config.wallet.max_message_age,
            ),
            WalletStore::new(db.clone()),
        ));

        let oidc = match &config.oidc {
            Some(oidc_config) => {
                tracing::info!(
                    "OIDC login enabled for provider {} ({})",
                    oidc_config.provider,
                    oidc_config.issuer
                );
                Some(Arc::new(OidcClient::new(oidc_config.clone())?))
            }
            None => {
                tracing::info!("OIDC login disabled - no client configured");
                None
            }
        };

        Ok(Self {
            config: Arc::new(config),
            db,
            account_manager,
            tokens: Arc::new(tokens),
            wallet_authenticator,
            oidc,
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!("http://{}:{}", self.config.service.host, self.config.service.port)
    }

    /// OIDC client, or 503 when none is configured
    pub fn oidc_client(&self) -> GateResult<&OidcClient> {
        self.oidc
            .as_deref()
            .ok_or_else(|| GateError::NotConfigured("OIDC login is not configured".to_string()))
    }
}

/// Context on a fresh in-memory database
#[cfg(test)]
pub async fn test_context(config: ServerConfig) -> AppContext {
    AppContext::with_pool(config, db::test_pool().await).unwrap()
}
