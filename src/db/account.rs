/// Identity database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Login provider that owns an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AuthProvider {
    /// Email and password
    Email,
    /// Any OIDC provider, by its configured name (e.g. "google")
    Oidc(String),
}

impl AuthProvider {
    pub fn as_str(&self) -> &str {
        match self {
            AuthProvider::Email => "email",
            AuthProvider::Oidc(name) => name,
        }
    }
}

impl From<String> for AuthProvider {
    fn from(value: String) -> Self {
        if value == "email" {
            AuthProvider::Email
        } else {
            AuthProvider::Oidc(value)
        }
    }
}

impl From<AuthProvider> for String {
    fn from(value: AuthProvider) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub username: String,
    /// Only password accounts have one
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    #[sqlx(try_from = "String")]
    pub auth_provider: AuthProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_subject_id: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Refresh token record; the raw token is never stored
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: i64,
    pub account_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub device_info: Option<String>,
}

/// Wallet identity record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    /// Lower-cased, `0x`-prefixed
    pub address: String,
    pub system: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        assert_eq!(AuthProvider::from("email".to_string()), AuthProvider::Email);
        assert_eq!(
            AuthProvider::from("google".to_string()),
            AuthProvider::Oidc("google".to_string())
        );
        assert_eq!(String::from(AuthProvider::Oidc("google".into())), "google");
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let account = Account {
            id: 1,
            email: "a@x.com".to_string(),
            username: "alice".to_string(),
            password_hash: Some("$2b$12$secret".to_string()),
            auth_provider: AuthProvider::Email,
            provider_subject_id: None,
            email_verified: false,
            avatar_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["auth_provider"], "email");
    }
}
