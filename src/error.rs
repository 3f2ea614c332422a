/// Unified error types for Gatehouse
use crate::{
    auth::{jwt::TokenError, refresh::RefreshTokenError},
    crypto::password::PasswordError,
    oidc::OidcError,
    wallet::EnvelopeError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum GateError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request body could not be decoded or failed field validation
    #[error("{0}")]
    MalformedInput(String),

    /// Wrong password or unknown identity. The message is fixed so the
    /// two cases cannot be told apart.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Any other authentication failure (bad token, revoked, expired)
    #[error("{0}")]
    Unauthorized(String),

    /// Cryptographic verification of a wallet signature failed
    #[error("{0}")]
    SignatureMismatch(String),

    /// Password registration with an email that already has a password account
    #[error("Email already registered")]
    DuplicateEmail,

    /// Email already bound to an account from a different provider
    #[error("{0}")]
    AccountConflict(String),

    /// OIDC provider rejected the request
    #[error("{0}")]
    UpstreamRejected(String),

    /// OIDC provider could not be reached
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// Feature not configured on this deployment
    #[error("{0}")]
    NotConfigured(String),

    /// Not found errors
    #[error("{0}")]
    NotFound(String),

    /// Invalid or missing configuration, raised at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Convert GateError to HTTP response
impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GateError::MalformedInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GateError::InvalidCredentials
            | GateError::Unauthorized(_)
            | GateError::SignatureMismatch(_)
            | GateError::UpstreamRejected(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            GateError::DuplicateEmail | GateError::AccountConflict(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            GateError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            GateError::NotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            GateError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            GateError::Database(_)
            | GateError::Config(_)
            | GateError::Internal(_)
            | GateError::Io(_) => {
                tracing::error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(), // Don't leak details
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<PasswordError> for GateError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::EmptyInput => GateError::MalformedInput(err.to_string()),
            PasswordError::Mismatch | PasswordError::NoHash => GateError::InvalidCredentials,
            PasswordError::Hashing(msg) => GateError::Internal(format!("Password hashing failed: {}", msg)),
        }
    }
}

impl From<TokenError> for GateError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(e) => GateError::Internal(format!("Failed to sign token: {}", e)),
            TokenError::Clock(e) => GateError::Internal(format!("System time error: {}", e)),
            _ => GateError::Unauthorized("Invalid or expired token".to_string()),
        }
    }
}

impl From<RefreshTokenError> for GateError {
    fn from(err: RefreshTokenError) -> Self {
        match err {
            RefreshTokenError::Database(e) => GateError::Database(e),
            RefreshTokenError::LifetimeOutOfRange => GateError::Internal(err.to_string()),
            RefreshTokenError::NotFoundOrAlreadyRevoked => GateError::Unauthorized(err.to_string()),
            // Never tell the client which of the three it was
            RefreshTokenError::NotFound | RefreshTokenError::Revoked | RefreshTokenError::Expired => {
                GateError::Unauthorized("Invalid or expired refresh token".to_string())
            }
        }
    }
}

impl From<EnvelopeError> for GateError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Malformed(_) => GateError::MalformedInput(err.to_string()),
            EnvelopeError::SignatureMismatch(_) => GateError::SignatureMismatch(err.to_string()),
            _ => GateError::Unauthorized(err.to_string()),
        }
    }
}

impl From<OidcError> for GateError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::Unreachable(_) | OidcError::Discovery(_) => {
                GateError::UpstreamUnavailable("Identity provider unavailable".to_string())
            }
            OidcError::ExchangeFailed(_) => {
                GateError::UpstreamRejected("Failed to exchange authorization code".to_string())
            }
            OidcError::VerificationFailed(_) => {
                GateError::UpstreamRejected("Failed to verify ID token".to_string())
            }
        }
    }
}

/// Result type alias for service operations
pub type GateResult<T> = Result<T, GateError>;

/// True when a database error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: GateError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_credentials_body() {
        let (status, body) = render(GateError::InvalidCredentials).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({"error": "Invalid credentials"}));
    }

    #[tokio::test]
    async fn test_storage_errors_do_not_leak() {
        let (status, body) = render(GateError::Database(sqlx::Error::RowNotFound)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_refresh_errors_are_indistinguishable() {
        let (_, not_found) = render(RefreshTokenError::NotFound.into()).await;
        let (_, revoked) = render(RefreshTokenError::Revoked.into()).await;
        let (status, expired) = render(RefreshTokenError::Expired.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(not_found, revoked);
        assert_eq!(revoked, expired);
    }

    #[tokio::test]
    async fn test_conflict_status() {
        let (status, _) = render(GateError::AccountConflict("taken".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, body) = render(GateError::DuplicateEmail).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Email already registered");
    }
}
