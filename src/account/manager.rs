/// Account manager implementation using runtime queries
use crate::{
    auth::{IdentityClaims, RefreshTokenStore, TokenService},
    crypto::password::{PasswordError, PasswordHasher},
    db::account::{Account, AuthProvider},
    error::{is_unique_violation, GateError, GateResult},
    oidc::ProviderClaims,
};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

const ACCOUNT_COLUMNS: &str = "id, email, username, password_hash, auth_provider, provider_subject_id,
     email_verified, avatar_url, created_at, updated_at";

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub account: Account,
}

/// Account manager service
#[derive(Clone)]
pub struct AccountManager {
    db: SqlitePool,
    hasher: PasswordHasher,
    tokens: TokenService,
    refresh_tokens: RefreshTokenStore,
    refresh_ttl: Duration,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        db: SqlitePool,
        hasher: PasswordHasher,
        tokens: TokenService,
        refresh_tokens: RefreshTokenStore,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            db,
            hasher,
            tokens,
            refresh_tokens,
            refresh_ttl,
        }
    }

    /// Create a password account.
    ///
    /// The UNIQUE(email, auth_provider) constraint decides duplicates; there
    /// is no pre-check.
    pub async fn register(&self, email: &str, username: &str, password: &str) -> GateResult<Account> {
        let email = normalize_email(email);
        let password_hash = self.hash_password(password).await?;
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO accounts (email, username, password_hash, auth_provider, email_verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(&email)
        .bind(username)
        .bind(&password_hash)
        .bind(AuthProvider::Email.as_str())
        .bind(false)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                GateError::DuplicateEmail
            } else {
                GateError::Database(e)
            }
        })?;

        let account = self.require_account(result.last_insert_rowid()).await?;
        tracing::info!("Registered account {} ({})", account.id, account.email);

        Ok(account)
    }

    /// Register and log straight in
    pub async fn register_and_login(
        &self,
        email: &str,
        username: &str,
        password: &str,
        device_info: Option<&str>,
    ) -> GateResult<AuthSession> {
        let account = self.register(email, username, password).await?;
        self.issue_token_pair(account, device_info).await
    }

    /// Password login.
    ///
    /// Unknown email, OIDC-only account and wrong password all end in the
    /// same `InvalidCredentials`, after the same amount of bcrypt work.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_info: Option<&str>,
    ) -> GateResult<AuthSession> {
        let email = normalize_email(email);

        let Some(account) = self.get_by_email_and_provider(&email, &AuthProvider::Email).await? else {
            self.burn_decoy(password).await;
            tracing::warn!("Login failed: invalid credentials");
            return Err(GateError::InvalidCredentials);
        };

        if let Err(e) = self.verify_password(account.password_hash.clone(), password).await {
            tracing::warn!("Login failed for account {}: {}", account.id, e);
            return Err(match e {
                PasswordError::Hashing(msg) => GateError::Internal(msg),
                _ => GateError::InvalidCredentials,
            });
        }

        self.touch(account.id).await?;
        let account = self.require_account(account.id).await?;
        tracing::info!("Account {} logged in", account.id);

        self.issue_token_pair(account, device_info).await
    }

    /// Issue an access token and persist a new refresh token
    pub async fn issue_token_pair(
        &self,
        account: Account,
        device_info: Option<&str>,
    ) -> GateResult<AuthSession> {
        let access_token = self.tokens.issue(account.id, account_claims(&account))?;
        let refresh_token = self
            .refresh_tokens
            .issue(account.id, self.refresh_ttl, device_info)
            .await?;

        Ok(AuthSession {
            access_token,
            refresh_token,
            account,
        })
    }

    /// New access token from a refresh token.
    ///
    /// The account is re-read so the claims are current. The refresh token
    /// itself is left as is.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> GateResult<String> {
        let account_id = self.refresh_tokens.validate(refresh_token).await?;

        let account = self.get_account(account_id).await?.ok_or_else(|| {
            tracing::warn!("Refresh token for missing account {}", account_id);
            GateError::Unauthorized("Account not found".to_string())
        })?;

        Ok(self.tokens.issue(account.id, account_claims(&account))?)
    }

    /// Revoke a refresh token
    pub async fn logout(&self, refresh_token: &str) -> GateResult<()> {
        self.refresh_tokens.revoke(refresh_token).await?;
        tracing::debug!("Refresh token revoked");
        Ok(())
    }

    /// Resolve verified OIDC claims to an account.
    ///
    /// 1. Known (provider, subject): touch `updated_at` and return it.
    /// 2. Email owned by another provider: conflict, nothing is written.
    /// 3. Otherwise create the account.
    pub async fn find_or_create_from_oidc(
        &self,
        provider: &str,
        claims: &ProviderClaims,
    ) -> GateResult<Account> {
        let provider = AuthProvider::from(provider.to_string());

        if let Some(account) = self.get_by_provider_subject(&provider, &claims.sub).await? {
            self.touch(account.id).await?;
            tracing::debug!("OIDC login for existing account {}", account.id);
            return self.require_account(account.id).await;
        }

        let email = normalize_email(&claims.email);

        if let Some(existing) = self.get_by_email_other_provider(&email, &provider).await? {
            tracing::warn!(
                "OIDC login rejected: email already bound to {} account {}",
                existing.auth_provider,
                existing.id
            );
            return Err(email_conflict());
        }

        let username = claims
            .given_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&email)
            .to_string();
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO accounts (email, username, auth_provider, provider_subject_id, email_verified, avatar_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(&email)
        .bind(&username)
        .bind(provider.as_str())
        .bind(&claims.sub)
        .bind(true)
        .bind(&claims.picture)
        .bind(now)
        .execute(&self.db)
        .await;

        match result {
            Ok(done) => {
                let account = self.require_account(done.last_insert_rowid()).await?;
                tracing::info!("Created {} account {}", provider, account.id);
                Ok(account)
            }
            // Lost a race: a concurrent login for the same subject may have
            // created the row first
            Err(e) if is_unique_violation(&e) => self
                .get_by_provider_subject(&provider, &claims.sub)
                .await?
                .ok_or_else(email_conflict),
            Err(e) => Err(GateError::Database(e)),
        }
    }

    /// OIDC login: resolve the account and issue a token pair
    pub async fn login_with_oidc(
        &self,
        provider: &str,
        claims: &ProviderClaims,
        device_info: Option<&str>,
    ) -> GateResult<AuthSession> {
        let account = self.find_or_create_from_oidc(provider, claims).await?;
        self.issue_token_pair(account, device_info).await
    }

    /// Get account by id
    pub async fn get_account(&self, id: i64) -> GateResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    pub async fn get_by_email_and_provider(
        &self,
        email: &str,
        provider: &AuthProvider,
    ) -> GateResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE email = ?1 AND auth_provider = ?2",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .bind(provider.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    pub async fn get_by_provider_subject(
        &self,
        provider: &AuthProvider,
        subject: &str,
    ) -> GateResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE auth_provider = ?1 AND provider_subject_id = ?2",
            ACCOUNT_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(subject)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    async fn get_by_email_other_provider(
        &self,
        email: &str,
        provider: &AuthProvider,
    ) -> GateResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE email = ?1 AND auth_provider != ?2 LIMIT 1",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .bind(provider.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    async fn require_account(&self, id: i64) -> GateResult<Account> {
        self.get_account(id)
            .await?
            .ok_or_else(|| GateError::Internal(format!("Account {} vanished after write", id)))
    }

    async fn touch(&self, id: i64) -> GateResult<()> {
        sqlx::query("UPDATE accounts SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// bcrypt is CPU-bound; keep it off the async workers
    async fn hash_password(&self, password: &str) -> GateResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        let digest = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| GateError::Internal(format!("Hashing task failed: {}", e)))??;

        Ok(digest)
    }

    async fn verify_password(
        &self,
        digest: Option<String>,
        password: &str,
    ) -> Result<(), PasswordError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || hasher.verify(digest.as_deref(), &password))
            .await
            .map_err(|e| PasswordError::Hashing(e.to_string()))?
    }

    async fn burn_decoy(&self, password: &str) {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        let _ = tokio::task::spawn_blocking(move || hasher.verify_decoy(&password)).await;
    }
}

fn account_claims(account: &Account) -> IdentityClaims {
    IdentityClaims::Account {
        email: account.email.clone(),
    }
}

fn email_conflict() -> GateError {
    GateError::AccountConflict("Email already registered with a different account".to_string())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
