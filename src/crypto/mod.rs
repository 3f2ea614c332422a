/// Cryptographic primitives for credential checks
///
/// Password hashing (bcrypt) and wallet signature recovery (secp256k1)

pub mod password;
pub mod signature;
