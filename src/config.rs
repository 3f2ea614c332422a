/// Configuration management for Gatehouse
use crate::crypto::password::DEFAULT_COST;
use crate::error::{GateError, GateResult};
use crate::oidc::{OidcConfig, GOOGLE_ISSUER};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shortest accepted HMAC secret, in bytes
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Longest accepted refresh token lifetime
pub const MAX_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Main server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    /// Absent when no OIDC client is registered
    pub oidc: Option<OidcConfig>,
    pub wallet: WalletConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

/// Wallet signature configuration
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Accepted clock distance, in either direction, of a signed timestamp
    pub max_message_age: Duration,
    /// First line of every signing message
    pub message_domain: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GateResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> GateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("GATEHOUSE_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_var(&lookup, "GATEHOUSE_PORT", 8082u16)?;

        let database_path = lookup("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/gatehouse.sqlite"));

        let jwt_secret = lookup("JWT_SECRET")
            .ok_or_else(|| GateError::Config("JWT_SECRET is required".to_string()))?;
        let access_token_ttl = Duration::from_secs(parse_var(&lookup, "JWT_ACCESS_EXPIRY_SECS", 900u64)?);
        let refresh_token_ttl =
            Duration::from_secs(parse_var(&lookup, "JWT_REFRESH_EXPIRY_SECS", 604_800u64)?);
        let bcrypt_cost = parse_var(&lookup, "BCRYPT_COST", DEFAULT_COST)?;

        let oidc = match (
            lookup("OIDC_CLIENT_ID"),
            lookup("OIDC_CLIENT_SECRET"),
            lookup("OIDC_REDIRECT_URI"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(OidcConfig {
                provider: lookup("OIDC_PROVIDER").unwrap_or_else(|| "google".to_string()),
                client_id,
                client_secret,
                redirect_uri,
                issuer: lookup("OIDC_ISSUER").unwrap_or_else(|| GOOGLE_ISSUER.to_string()),
                token_endpoint: lookup("OIDC_TOKEN_ENDPOINT"),
                jwks_ttl: Duration::from_secs(parse_var(&lookup, "OIDC_JWKS_TTL_SECS", 3600u64)?),
            }),
            (None, None, None) => None,
            _ => {
                return Err(GateError::Config(
                    "OIDC_CLIENT_ID, OIDC_CLIENT_SECRET and OIDC_REDIRECT_URI must be set together"
                        .to_string(),
                ))
            }
        };

        let max_message_age =
            Duration::from_secs(parse_var(&lookup, "WALLET_MAX_MESSAGE_AGE_SECS", 300u64)?);
        let message_domain =
            lookup("WALLET_MESSAGE_DOMAIN").unwrap_or_else(|| "Gatehouse".to_string());

        let level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                host,
                port,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig { database_path },
            authentication: AuthConfig {
                jwt_secret,
                access_token_ttl,
                refresh_token_ttl,
                bcrypt_cost,
            },
            oidc,
            wallet: WalletConfig {
                max_message_age,
                message_domain,
            },
            logging: LoggingConfig { level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> GateResult<()> {
        if self.service.host.is_empty() {
            return Err(GateError::Config("GATEHOUSE_HOST cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(GateError::Config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_JWT_SECRET_LEN
            )));
        }

        let access = self.authentication.access_token_ttl;
        if access < Duration::from_secs(1) || access > Duration::from_secs(24 * 3600) {
            return Err(GateError::Config(
                "JWT_ACCESS_EXPIRY_SECS must be between 1 second and 24 hours".to_string(),
            ));
        }

        let refresh = self.authentication.refresh_token_ttl;
        if refresh < Duration::from_secs(24 * 3600) || refresh > MAX_REFRESH_TOKEN_TTL {
            return Err(GateError::Config(
                "JWT_REFRESH_EXPIRY_SECS must be between 24 hours and 365 days".to_string(),
            ));
        }

        if !(4..=31).contains(&self.authentication.bcrypt_cost) {
            return Err(GateError::Config("BCRYPT_COST must be between 4 and 31".to_string()));
        }

        if self.wallet.max_message_age.is_zero() {
            return Err(GateError::Config(
                "WALLET_MAX_MESSAGE_AGE_SECS must be greater than zero".to_string(),
            ));
        }

        if self.wallet.message_domain.trim().is_empty() || self.wallet.message_domain.contains('\n') {
            return Err(GateError::Config(
                "WALLET_MESSAGE_DOMAIN must be a single non-empty line".to_string(),
            ));
        }

        if let Some(oidc) = &self.oidc {
            if oidc.provider.is_empty() || oidc.provider == "email" {
                return Err(GateError::Config(
                    "OIDC_PROVIDER must name a provider other than \"email\"".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> GateResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GateError::Config(format!("{} has an invalid value", key))),
        None => Ok(default),
    }
}

/// Valid configuration for tests: fast bcrypt, no OIDC
#[cfg(test)]
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::from_lookup(|key| match key {
        "JWT_SECRET" => Some(tests::TEST_SECRET.to_string()),
        "BCRYPT_COST" => Some("4".to_string()),
        _ => None,
    })
    .unwrap();
    config.storage.database_path = PathBuf::from(":memory:");
    config
}
