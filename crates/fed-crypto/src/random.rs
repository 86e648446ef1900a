//! Cryptographically secure random material.

use rand::rngs::OsRng;
use rand::RngCore;

/// Returns `n` bytes from the operating system CSPRNG.
#[must_use]
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}
