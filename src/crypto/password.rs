/// Password hashing and verification using bcrypt
///
/// Digests are self-contained modular-crypt strings (`$2b$<cost>$<salt><hash>`),
/// so no separate salt column is needed.
use thiserror::Error;

/// Work factor used outside of tests
pub const DEFAULT_COST: u32 = 12;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password cannot be empty")]
    EmptyInput,

    #[error("Failed to hash password: {0}")]
    Hashing(String),

    #[error("Password does not match")]
    Mismatch,

    /// Account has no password (OIDC-only)
    #[error("Password hash is not set")]
    NoHash,
}

/// bcrypt hasher with a fixed work factor
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Digest of a random secret, checked when the account does not exist so
    /// unknown emails cost the same as wrong passwords.
    decoy_hash: String,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").field("cost", &self.cost).finish()
    }
}

impl PasswordHasher {
    /// Create a hasher with the given bcrypt cost
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        use rand::Rng;
        let decoy: [u8; 16] = rand::thread_rng().gen();
        let decoy_hash = bcrypt::hash(hex::encode(decoy), cost)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;

        Ok(Self { cost, decoy_hash })
    }

    /// Hash a plaintext password
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        if password.is_empty() {
            return Err(PasswordError::EmptyInput);
        }

        bcrypt::hash(password, self.cost).map_err(|e| PasswordError::Hashing(e.to_string()))
    }

    /// Verify a plaintext password against a stored digest.
    ///
    /// Fails closed: a missing digest, a malformed digest and a wrong
    /// password are all rejections. bcrypt compares in constant time.
    pub fn verify(&self, digest: Option<&str>, password: &str) -> Result<(), PasswordError> {
        let Some(digest) = digest else {
            // Burn the same work as a real check before refusing
            let _ = bcrypt::verify(password, &self.decoy_hash);
            return Err(PasswordError::NoHash);
        };

        match bcrypt::verify(password, digest) {
            Ok(true) => Ok(()),
            Ok(false) => Err(PasswordError::Mismatch),
            Err(e) => {
                tracing::warn!("Stored password digest could not be parsed: {}", e);
                Err(PasswordError::Mismatch)
            }
        }
    }

    /// Spend one verification worth of time without a real account
    pub fn verify_decoy(&self, password: &str) {
        let _ = bcrypt::verify(password, &self.decoy_hash);
    }
}
