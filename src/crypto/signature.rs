/// Wallet signature verification
///
/// One `SignatureVerifier` per signing system. New systems are added by
/// registering another implementation in `SignatureVerifiers`, never by
/// branching inside an existing one.
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Signature verification errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid signature encoding")]
    InvalidEncoding,

    #[error("Invalid signature length: {0}")]
    InvalidLength(usize),

    #[error("Invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("Failed to recover public key")]
    RecoveryFailed,

    #[error("Signature does not match address")]
    AddressMismatch,

    #[error("Unsupported system: {0}")]
    UnsupportedSystem(String),
}

/// Verifies that `signature` over `message` was produced by `address`
pub trait SignatureVerifier: Send + Sync {
    /// System tag declared in the envelope header (e.g. "ethereum")
    fn system(&self) -> &'static str;

    /// Recover the signer and compare it with the claimed address.
    ///
    /// Returns the signer's canonical address, the one spelling every
    /// accepted form of `address` maps to.
    fn verify(&self, address: &str, message: &[u8], signature: &str) -> Result<String, SignatureError>;
}

/// Registry of verifiers keyed by system tag
#[derive(Clone, Default)]
pub struct SignatureVerifiers {
    verifiers: HashMap<&'static str, Arc<dyn SignatureVerifier>>,
}

impl SignatureVerifiers {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in system
    pub fn with_defaults() -> Self {
        Self::new().register(EthereumVerifier)
    }

    /// Add a verifier for its system tag
    pub fn register<V: SignatureVerifier + 'static>(mut self, verifier: V) -> Self {
        self.verifiers.insert(verifier.system(), Arc::new(verifier));
        self
    }

    /// Dispatch to the verifier for `system`
    pub fn verify(
        &self,
        system: &str,
        address: &str,
        message: &[u8],
        signature: &str,
    ) -> Result<String, SignatureError> {
        let verifier = self
            .verifiers
            .get(system)
            .ok_or_else(|| SignatureError::UnsupportedSystem(system.to_string()))?;

        verifier.verify(address, message, signature)
    }
}

/// EIP-191 personal-sign over secp256k1
#[derive(Debug, Clone, Copy, Default)]
pub struct EthereumVerifier;

impl SignatureVerifier for EthereumVerifier {
    fn system(&self) -> &'static str {
        "ethereum"
    }

    fn verify(&self, address: &str, message: &[u8], signature: &str) -> Result<String, SignatureError> {
        let sig_bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|_| SignatureError::InvalidEncoding)?;

        if sig_bytes.len() != 65 {
            return Err(SignatureError::InvalidLength(sig_bytes.len()));
        }

        let recovery_id = parse_recovery_id(sig_bytes[64])?;
        let sig = Signature::from_slice(&sig_bytes[..64]).map_err(|_| SignatureError::InvalidEncoding)?;

        let hash = personal_message_hash(message);
        let recovered = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
            .map_err(|_| SignatureError::RecoveryFailed)?;

        let recovered_address = address_from_key(&recovered);
        let claimed = address.trim_start_matches("0x").trim_start_matches("0X");

        if !recovered_address.eq_ignore_ascii_case(claimed) {
            return Err(SignatureError::AddressMismatch);
        }

        Ok(format!("0x{}", recovered_address))
    }
}

/// Keccak-256 of `"\x19Ethereum Signed Message:\n" + len(message) + message`
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Lower-case hex address (no `0x`) of an uncompressed secp256k1 key
pub fn address_from_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 prefix, keep the last 20 bytes of the hash
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    hex::encode(&hash[12..])
}

/// Wallets emit v as 27/28; the recovery primitive expects 0/1
fn parse_recovery_id(v: u8) -> Result<RecoveryId, SignatureError> {
    let id = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        _ => return Err(SignatureError::InvalidRecoveryId(v)),
    };

    RecoveryId::try_from(id).map_err(|_| SignatureError::InvalidRecoveryId(v))
}
