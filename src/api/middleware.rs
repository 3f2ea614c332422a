/// Authentication middleware
///
/// Bearer mode validates an access token; signed-envelope mode takes the
/// whole request body as the credential. Both attach the identity to the
/// request extensions and leave no state behind on failure.
use crate::{auth::RequestIdentity, context::AppContext, error::GateError};
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Largest envelope accepted as a request body
pub const MAX_ENVELOPE_BYTES: usize = 64 * 1024;

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Require a valid bearer token - 401 otherwise
pub async fn require_auth(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, GateError> {
    let token = extract_bearer_token(req.headers())
        .ok_or_else(|| GateError::Unauthorized("Missing authorization header".to_string()))?;

    let identity = RequestIdentity::from_token(&ctx.tokens, &token).map_err(|e| {
        tracing::debug!("Bearer token rejected: {}", e);
        GateError::from(e)
    })?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Attach the identity when a valid bearer token is present
pub async fn optional_auth(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_bearer_token(req.headers()) {
        match RequestIdentity::from_token(&ctx.tokens, &token) {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
            }
            Err(e) => {
                // Invalid token - continue anonymously
                tracing::debug!("Ignoring invalid bearer token: {}", e);
            }
        }
    }

    next.run(req).await
}

/// Require a signed envelope as the request body.
///
/// On success the handler receives an empty body plus the verified payload
/// in the extensions; it must never re-read the raw envelope.
pub async fn require_signed_envelope(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Result<Response, GateError> {
    let (mut parts, body) = req.into_parts();

    let bytes = axum::body::to_bytes(body, MAX_ENVELOPE_BYTES)
        .await
        .map_err(|_| GateError::MalformedInput("Unreadable or oversized request body".to_string()))?;
    let raw = std::str::from_utf8(&bytes)
        .map_err(|_| GateError::MalformedInput("Envelope must be UTF-8".to_string()))?;

    let verified = ctx
        .wallet_authenticator
        .authenticate(raw)
        .await
        .map_err(|e| {
            tracing::warn!("Signed request rejected: {}", e);
            e
        })?;

    parts.extensions.insert(RequestIdentity::from(&verified));
    parts.extensions.insert(Arc::new(verified));

    Ok(next.run(Request::from_parts(parts, Body::empty())).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc")), Some("abc".to_string()));
        assert_eq!(extract_bearer_token(&headers("Basic abc")), None);
        assert_eq!(extract_bearer_token(&headers("Bearer ")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }
}
