//! CBC block ciphers with PKCS#7 padding.
//!
//! These are the content-encryption algorithms of XML Encryption as used
//! by SAML: 3DES-CBC and AES-128/192/256-CBC. The IV is handled by the
//! caller (XML-Enc prepends it to the ciphertext).

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;

use crate::error::CryptoError;

/// Supported CBC block-cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockAlgorithm {
    /// Triple-DES in CBC mode (legacy interoperability only).
    TripleDesCbc,
    /// AES-128 in CBC mode.
    Aes128Cbc,
    /// AES-192 in CBC mode.
    Aes192Cbc,
    /// AES-256 in CBC mode.
    Aes256Cbc,
}

impl BlockAlgorithm {
    /// Key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::TripleDesCbc => 24,
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
        }
    }

    /// IV (block) length in bytes.
    #[must_use]
    pub const fn iv_len(self) -> usize {
        match self {
            Self::TripleDesCbc => 8,
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
        }
    }

    fn check_key_iv(self, key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        if key.len() != self.key_len() {
            return Err(CryptoError::InvalidLength(format!(
                "{self:?} requires a {}-byte key, got {}",
                self.key_len(),
                key.len()
            )));
        }
        if iv.len() != self.iv_len() {
            return Err(CryptoError::InvalidLength(format!(
                "{self:?} requires a {}-byte IV, got {}",
                self.iv_len(),
                iv.len()
            )));
        }
        Ok(())
    }
}

/// Encrypts `plaintext` in CBC mode with PKCS#7 padding.
pub fn cbc_encrypt(
    alg: BlockAlgorithm,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    alg.check_key_iv(key, iv)?;
    let invalid = |e: cbc::cipher::InvalidLength| CryptoError::InvalidLength(e.to_string());
    let ct = match alg {
        BlockAlgorithm::TripleDesCbc => cbc::Encryptor::<TdesEde3>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        BlockAlgorithm::Aes128Cbc => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        BlockAlgorithm::Aes192Cbc => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        BlockAlgorithm::Aes256Cbc => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    Ok(ct)
}

/// Decrypts CBC ciphertext and strips PKCS#7 padding.
pub fn cbc_decrypt(
    alg: BlockAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    alg.check_key_iv(key, iv)?;
    let invalid = |e: cbc::cipher::InvalidLength| CryptoError::InvalidLength(e.to_string());
    let unpad = |e: cbc::cipher::block_padding::UnpadError| {
        CryptoError::Decryption(format!("bad padding: {e}"))
    };
    let pt = match alg {
        BlockAlgorithm::TripleDesCbc => cbc::Decryptor::<TdesEde3>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad)?,
        BlockAlgorithm::Aes128Cbc => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad)?,
        BlockAlgorithm::Aes192Cbc => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad)?,
        BlockAlgorithm::Aes256Cbc => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad)?,
    };
    Ok(pt)
}
