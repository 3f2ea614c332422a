/// Authentication: access tokens, refresh tokens and request extractors
///
/// Middleware in `api::middleware` attaches a [`RequestIdentity`] to the
/// request extensions; handlers pull it back out with [`AuthContext`],
/// [`OptionalAuthContext`] or [`SignedRequest`].
pub mod jwt;
pub mod refresh;

pub use jwt::{Claims, IdentityClaims, TokenError, TokenService};
pub use refresh::RefreshTokenStore;

use crate::{
    api::middleware::extract_bearer_token, context::AppContext, error::GateError,
    wallet::VerifiedIdentity,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

/// Password or OIDC account behind a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub account_id: i64,
    pub email: String,
}

/// Wallet behind a bearer token or a signed envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletIdentity {
    pub wallet_id: i64,
    pub address: String,
    pub system: String,
}

/// Who made the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    Account(AccountIdentity),
    Wallet(WalletIdentity),
}

impl RequestIdentity {
    /// Build from validated access token claims
    pub fn from_claims(claims: &Claims) -> Result<Self, TokenError> {
        let subject_id = claims.subject_id()?;

        Ok(match &claims.identity {
            IdentityClaims::Account { email } => RequestIdentity::Account(AccountIdentity {
                account_id: subject_id,
                email: email.clone(),
            }),
            IdentityClaims::Wallet { address, system } => RequestIdentity::Wallet(WalletIdentity {
                wallet_id: subject_id,
                address: address.clone(),
                system: system.clone(),
            }),
        })
    }

    /// Validate a bearer token into an identity
    pub fn from_token(tokens: &TokenService, token: &str) -> Result<Self, TokenError> {
        let claims = tokens.validate(token)?;
        Self::from_claims(&claims)
    }
}

impl From<&VerifiedIdentity> for RequestIdentity {
    fn from(verified: &VerifiedIdentity) -> Self {
        RequestIdentity::Wallet(WalletIdentity {
            wallet_id: verified.wallet.id,
            address: verified.wallet.address.clone(),
            system: verified.system.clone(),
        })
    }
}

/// Authenticated request - 401 without a valid identity
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: RequestIdentity,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = GateError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        // Already attached by middleware
        if let Some(identity) = parts.extensions.get::<RequestIdentity>() {
            return Ok(AuthContext {
                identity: identity.clone(),
            });
        }

        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| GateError::Unauthorized("Missing authorization header".to_string()))?;

        let identity = RequestIdentity::from_token(&state.tokens, &token)?;

        Ok(AuthContext { identity })
    }
}

/// Optional authentication - never rejects
#[derive(Debug, Clone)]
pub struct OptionalAuthContext {
    pub identity: Option<RequestIdentity>,
}

#[async_trait]
impl FromRequestParts<AppContext> for OptionalAuthContext {
    type Rejection = GateError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<RequestIdentity>() {
            return Ok(OptionalAuthContext {
                identity: Some(identity.clone()),
            });
        }

        let identity = extract_bearer_token(&parts.headers)
            .and_then(|token| RequestIdentity::from_token(&state.tokens, &token).ok());

        Ok(OptionalAuthContext { identity })
    }
}

/// Request that passed the signed-envelope middleware.
///
/// Carries the verified payload; handlers read their input from here and
/// never from the request body.
#[derive(Debug, Clone)]
pub struct SignedRequest(pub Arc<VerifiedIdentity>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SignedRequest {
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<VerifiedIdentity>>()
            .cloned()
            .map(SignedRequest)
            .ok_or_else(|| GateError::Unauthorized("Signed request required".to_string()))
    }
}
