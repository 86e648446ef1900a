//! RSA key transport (wrap/unwrap of symmetric session keys).
//!
//! XML Encryption carries the content-encryption key wrapped with the
//! recipient's RSA key, either with OAEP (MGF1/SHA-1) or the older
//! PKCS#1 v1.5 padding. Both paddings operate on the same RSA key
//! material, which is why a PKCS#1 v1.5 key handle can legitimately
//! unwrap an OAEP-wrapped key when the protocol layer allows it.

use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Encrypt};
use sha1::Sha1;

use crate::error::CryptoError;
use crate::signature::{private_key_from_der, public_key_from_der};

/// RSA key-transport paddings used by XML Encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransportAlgorithm {
    /// RSA PKCS#1 v1.5 (legacy).
    Pkcs1v15,
    /// RSA-OAEP with MGF1 over SHA-1.
    OaepMgf1Sha1,
}

/// Wraps `key_material` with an RSA public key (SubjectPublicKeyInfo DER).
pub fn rsa_wrap_key(
    spki_der: &[u8],
    key_material: &[u8],
    alg: KeyTransportAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    let key = public_key_from_der(spki_der)?;
    let mut rng = OsRng;
    let wrapped = match alg {
        KeyTransportAlgorithm::Pkcs1v15 => key.encrypt(&mut rng, Pkcs1v15Encrypt, key_material),
        KeyTransportAlgorithm::OaepMgf1Sha1 => {
            key.encrypt(&mut rng, Oaep::new::<Sha1>(), key_material)
        }
    };
    wrapped.map_err(|e| CryptoError::Encryption(format!("RSA key wrap failed: {e}")))
}

/// Unwraps a session key with an RSA private key (PKCS#8 or PKCS#1 DER).
pub fn rsa_unwrap_key(
    key_der: &[u8],
    wrapped: &[u8],
    alg: KeyTransportAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    let key = private_key_from_der(key_der)?;
    let unwrapped = match alg {
        KeyTransportAlgorithm::Pkcs1v15 => key.decrypt(Pkcs1v15Encrypt, wrapped),
        KeyTransportAlgorithm::OaepMgf1Sha1 => key.decrypt(Oaep::new::<Sha1>(), wrapped),
    };
    unwrapped.map_err(|e| CryptoError::Decryption(format!("RSA key unwrap failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::random_bytes;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
    use rsa::RsaPrivateKey;

    fn test_key() -> (Vec<u8>, Vec<u8>) {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let private = key.to_pkcs8_der().unwrap().as_bytes().to_vec();
        let public = key
            .to_public_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        (private, public)
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let (private, public) = test_key();
        let session = random_bytes(16);
        for alg in [
            KeyTransportAlgorithm::OaepMgf1Sha1,
            KeyTransportAlgorithm::Pkcs1v15,
        ] {
            let wrapped = rsa_wrap_key(&public, &session, alg).unwrap();
            let unwrapped = rsa_unwrap_key(&private, &wrapped, alg).unwrap();
            assert_eq!(unwrapped, session);
        }
    }

    #[test]
    fn unwrap_with_wrong_padding_fails() {
        let (private, public) = test_key();
        let session = random_bytes(16);
        let wrapped =
            rsa_wrap_key(&public, &session, KeyTransportAlgorithm::OaepMgf1Sha1).unwrap();
        assert!(rsa_unwrap_key(&private, &wrapped, KeyTransportAlgorithm::Pkcs1v15).is_err());
    }
}
