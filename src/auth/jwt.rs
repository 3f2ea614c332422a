/// Stateless access tokens
///
/// HS256-signed JWTs carrying the subject and its identity claims. Validity
/// is decided by signature and expiry alone; there is no storage lookup and
/// no way to revoke a token before it expires.

use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// The only algorithm this service issues or accepts
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Identity-specific claims, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityClaims {
    /// Password or OIDC account
    Account { email: String },
    /// Wallet authenticated by signature
    Wallet {
        #[serde(rename = "addr")]
        address: String,
        #[serde(rename = "sys")]
        system: String,
    },
}

/// JWT claims embedded in every access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id or wallet id, as a decimal string
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiration (Unix seconds)
    pub exp: u64,
    #[serde(flatten)]
    pub identity: IdentityClaims,
}

impl Claims {
    /// Numeric subject id
    pub fn subject_id(&self) -> Result<i64, TokenError> {
        self.sub.parse().map_err(|_| TokenError::Invalid)
    }
}

/// Access token errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token")]
    Invalid,

    #[error("Token has expired")]
    Expired,

    #[error("Unexpected signing algorithm: {0:?}")]
    WrongAlgorithm(Algorithm),

    #[error("Failed to encode token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("System time error: {0}")]
    Clock(#[from] std::time::SystemTimeError),
}

/// Issues and validates access tokens with a shared secret
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    /// Create a token service. The secret length is checked by config validation.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issue a token with the configured lifetime
    pub fn issue(&self, subject_id: i64, identity: IdentityClaims) -> Result<String, TokenError> {
        self.issue_with_ttl(subject_id, identity, self.ttl)
    }

    /// Issue a token with an explicit lifetime
    pub fn issue_with_ttl(
        &self,
        subject_id: i64,
        identity: IdentityClaims,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let claims = Claims {
            sub: subject_id.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
            identity,
        };

        Ok(encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)?)
    }

    /// Validate a token and return its claims.
    ///
    /// The declared algorithm is checked before the secret is used, then the
    /// signature, then expiry (no leeway).
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Invalid)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::WrongAlgorithm(header.alg));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        Ok(token_data.claims)
    }
}
