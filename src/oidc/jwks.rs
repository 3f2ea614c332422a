/// Provider signing key cache
use super::OidcError;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default lifetime of a fetched key set
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Shortest gap between two fetches forced by an unknown `kid`
pub const MIN_JWKS_REFETCH: Duration = Duration::from_secs(30);

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Caches the provider's JWKS for a fixed TTL.
///
/// An unknown `kid` forces one refetch before the lookup fails, so key
/// rotation on the provider side is picked up without waiting for expiry.
/// Such refetches happen at most once per `min_refetch`; in between, an
/// unknown `kid` fails against the cached set.
pub struct JwksCache {
    http: reqwest::Client,
    ttl: Duration,
    min_refetch: Duration,
    cached: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    pub fn new(http: reqwest::Client, ttl: Duration, min_refetch: Duration) -> Self {
        Self {
            http,
            ttl,
            min_refetch,
            cached: RwLock::new(None),
        }
    }

    /// Find the signing key for `kid` in the set published at `jwks_uri`
    pub async fn get_key(&self, jwks_uri: &str, kid: Option<&str>) -> Result<Jwk, OidcError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                let age = entry.fetched_at.elapsed();
                if age < self.ttl {
                    if let Some(key) = select_key(&entry.keys, kid) {
                        return Ok(key);
                    }
                    if age < self.min_refetch {
                        return Err(no_matching_key());
                    }
                }
            }
        }

        let keys = self.fetch(jwks_uri).await?;
        let key = select_key(&keys, kid);

        *self.cached.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        key.ok_or_else(no_matching_key)
    }

    async fn fetch(&self, jwks_uri: &str) -> Result<JwkSet, OidcError> {
        tracing::debug!("Fetching JWKS from {}", jwks_uri);

        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::Discovery(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| OidcError::Discovery(format!("Invalid JWKS: {}", e)))
    }
}

fn no_matching_key() -> OidcError {
    OidcError::VerificationFailed("no matching signing key".to_string())
}

/// With a `kid`, only that key; without one, only an unambiguous single key
fn select_key(keys: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => keys.find(kid).cloned(),
        None if keys.keys.len() == 1 => keys.keys.first().cloned(),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::test_support::{jwk_set, MockProvider, TEST_KID};

    fn cache(ttl: Duration) -> JwksCache {
        JwksCache::new(reqwest::Client::new(), ttl, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fetches_once_within_ttl() {
        let provider = MockProvider::start().await;
        let cache = cache(DEFAULT_JWKS_TTL);

        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();
        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();

        assert_eq!(provider.jwks_hits(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_once() {
        let provider = MockProvider::start().await;
        let cache = cache(DEFAULT_JWKS_TTL);

        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();
        let err = cache
            .get_key(&provider.jwks_uri(), Some("rotated-away"))
            .await
            .unwrap_err();

        assert!(matches!(err, OidcError::VerificationFailed(_)));
        assert_eq!(provider.jwks_hits(), 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_throttled() {
        let provider = MockProvider::start().await;
        let cache = JwksCache::new(reqwest::Client::new(), DEFAULT_JWKS_TTL, MIN_JWKS_REFETCH);

        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();
        for kid in ["made-up-1", "made-up-2", "made-up-3"] {
            let err = cache
                .get_key(&provider.jwks_uri(), Some(kid))
                .await
                .unwrap_err();
            assert!(matches!(err, OidcError::VerificationFailed(_)));
        }

        // Known keys still resolve from the cache
        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();
        assert_eq!(provider.jwks_hits(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let provider = MockProvider::start().await;
        let cache = cache(Duration::from_millis(0));

        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();
        cache.get_key(&provider.jwks_uri(), Some(TEST_KID)).await.unwrap();

        assert_eq!(provider.jwks_hits(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let err = cache(DEFAULT_JWKS_TTL)
            .get_key("http://127.0.0.1:1/jwks", Some(TEST_KID))
            .await
            .unwrap_err();

        assert!(matches!(err, OidcError::Unreachable(_)));
    }

    #[test]
    fn test_select_key_without_kid() {
        let single = jwk_set();
        assert!(select_key(&single, None).is_some());

        let mut double = jwk_set();
        double.keys.push(double.keys[0].clone());
        assert!(select_key(&double, None).is_none());
    }
}
