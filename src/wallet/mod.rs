/// Wallet authentication
///
/// Signed envelopes are verified by `envelope`, and the signer is then
/// resolved to a persisted wallet row by `store`.
pub mod envelope;
pub mod store;

pub use envelope::{Envelope, EnvelopePayload, EnvelopeVerifier};
pub use store::WalletStore;

use crate::db::account::Wallet;
use crate::error::GateResult;
use serde_json::Value;
use thiserror::Error;

/// Envelope verification errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Invalid envelope header: {0}")]
    BadHeader(String),

    #[error("Invalid envelope payload: {0}")]
    BadPayload(String),

    #[error("Signed message has expired")]
    Expired,

    #[error("Signature verification failed")]
    SignatureMismatch(String),

    #[error("Unsupported signing system: {0}")]
    UnsupportedSystem(String),
}

/// A verified signer bound to its wallet row
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub wallet: Wallet,
    pub system: String,
    pub payload: EnvelopePayload,
    /// Decoded payload exactly as the client sent it
    pub raw_payload: Value,
}

impl VerifiedIdentity {
    pub fn action(&self) -> &str {
        self.payload.action()
    }
}

/// Envelope verification followed by wallet resolution
#[derive(Clone)]
pub struct WalletAuthenticator {
    verifier: EnvelopeVerifier,
    store: WalletStore,
}

impl WalletAuthenticator {
    pub fn new(verifier: EnvelopeVerifier, store: WalletStore) -> Self {
        Self { verifier, store }
    }

    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    /// Parse, verify and resolve a compact envelope.
    ///
    /// Nothing is written unless the signature checks out.
    pub async fn authenticate(&self, raw: &str) -> GateResult<VerifiedIdentity> {
        let envelope = Envelope::parse(raw)?;
        let verified = self.verifier.verify(&envelope)?;

        let wallet = self
            .store
            .get_or_create(&verified.address, &verified.system)
            .await?;

        tracing::debug!(
            "Verified {} envelope from {} (action: {})",
            verified.system,
            wallet.address,
            verified.payload.action()
        );

        Ok(VerifiedIdentity {
            wallet,
            system: verified.system,
            payload: verified.payload,
            raw_payload: verified.raw_payload,
        })
    }
}
