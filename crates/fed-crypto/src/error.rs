//! Error type for cryptographic operations.

use thiserror::Error;

/// Errors surfaced by the primitives in this crate.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key could not be parsed or has the wrong form for the operation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key or IV material has an unexpected length.
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (includes padding errors).
    #[error("decryption failed: {0}")]
    Decryption(String),
}
