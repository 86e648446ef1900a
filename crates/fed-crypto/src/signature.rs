//! RSA PKCS#1 v1.5 signing and verification.
//!
//! SHA-1 is accepted on both paths for interoperability with deployed SAML
//! implementations that still emit `rsa-sha1` signatures.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::CryptoError;
use crate::hash;

/// Digest choice for RSA PKCS#1 v1.5 signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaDigest {
    /// SHA-1 (legacy interoperability only).
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl RsaDigest {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => hash::sha1(data),
            Self::Sha256 => hash::sha256(data),
            Self::Sha384 => hash::sha384(data),
            Self::Sha512 => hash::sha512(data),
        }
    }

    fn scheme(self) -> Pkcs1v15Sign {
        match self {
            Self::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            Self::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

/// Parses an RSA private key from PKCS#8 or PKCS#1 DER.
pub fn private_key_from_der(key_der: &[u8]) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_der(key_der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(key_der))
        .map_err(|e| CryptoError::InvalidKey(format!("RSA private key: {e}")))
}

/// Parses an RSA public key from SubjectPublicKeyInfo DER.
pub fn public_key_from_der(spki_der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::InvalidKey(format!("RSA public key: {e}")))
}

/// Signs `data` with an RSA private key (PKCS#8 or PKCS#1 DER).
///
/// # Errors
///
/// Returns an error if the key cannot be parsed or signing fails.
pub fn rsa_sign(key_der: &[u8], data: &[u8], digest: RsaDigest) -> Result<Vec<u8>, CryptoError> {
    let key = private_key_from_der(key_der)?;
    let hashed = digest.digest(data);
    key.sign(digest.scheme(), &hashed)
        .map_err(|e| CryptoError::Signing(format!("RSA signing failed: {e}")))
}

/// Verifies an RSA signature over `data`.
///
/// The key is a `SubjectPublicKeyInfo` DER blob. A signature that does not
/// match returns `Ok(false)`; only key-parsing problems are errors.
pub fn rsa_verify(
    spki_der: &[u8],
    data: &[u8],
    sig: &[u8],
    digest: RsaDigest,
) -> Result<bool, CryptoError> {
    let key = public_key_from_der(spki_der)?;
    let hashed = digest.digest(data);
    Ok(key.verify(digest.scheme(), &hashed, sig).is_ok())
}
