//! # fed-crypto
//!
//! Cryptographic primitives for the FedPoint identity provider.
//!
//! This crate deliberately carries the legacy algorithm set that SAML 2.0
//! interoperability still requires: SHA-1 digests, RSA PKCS#1 v1.5
//! signatures, RSA-OAEP/PKCS#1 v1.5 key transport and CBC block ciphers
//! (AES-128/192/256 and 3DES). Nothing protocol-specific lives here; the
//! protocol crates decide which algorithm is acceptable where.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod error;
pub mod hash;
pub mod keywrap;
pub mod random;
pub mod signature;

pub use cipher::{cbc_decrypt, cbc_encrypt, BlockAlgorithm};
pub use error::CryptoError;
pub use hash::{sha1, sha256, sha384, sha512};
pub use keywrap::{rsa_unwrap_key, rsa_wrap_key, KeyTransportAlgorithm};
pub use random::random_bytes;
pub use signature::{rsa_sign, rsa_verify, RsaDigest};
