//! Digest functions.
//!
//! SHA-1 is kept for XML-DSig/XML-Enc interoperability with deployed SAML
//! peers; it must not be used for anything else.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Computes a SHA-1 digest of the input data.
#[must_use]
pub fn sha1(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

/// Computes a SHA-256 digest of the input data.
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Computes a SHA-384 digest of the input data.
#[must_use]
pub fn sha384(data: &[u8]) -> Vec<u8> {
    Sha384::digest(data).to_vec()
}

/// Computes a SHA-512 digest of the input data.
#[must_use]
pub fn sha512(data: &[u8]) -> Vec<u8> {
    Sha512::digest(data).to_vec()
}
