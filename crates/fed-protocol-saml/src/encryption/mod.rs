//! XML Encryption for assertions and name identifiers.
//!
//! Two operations around one OAEP/CBC key-wrapping protocol. Encrypting
//! with a symmetric key applies that key directly; encrypting with an RSA
//! key generates a fresh AES-128-CBC session key, encrypts the content
//! with it and wraps the session key into the element's KeyInfo.
//! Decryption refuses any algorithm disagreement between the caller's key
//! and the message, with one deliberate exception: a key declared as
//! RSA-1.5 is accepted where the message declares RSA-OAEP-MGF1P, because
//! the two paddings share key material.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use fed_crypto::{cbc_decrypt, cbc_encrypt, random_bytes, rsa_unwrap_key, rsa_wrap_key};
use fed_crypto::{BlockAlgorithm, KeyTransportAlgorithm};

use crate::error::{SamlError, SamlResult};
use crate::types::{encryption_algorithms, NameId, SAML_NS, XSI_NS};
use crate::xml::Element;

/// XML Encryption algorithms understood by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// Triple-DES in CBC mode.
    TripleDesCbc,
    /// AES-128 in CBC mode.
    Aes128Cbc,
    /// AES-192 in CBC mode.
    Aes192Cbc,
    /// AES-256 in CBC mode.
    Aes256Cbc,
    /// RSA PKCS#1 v1.5 key transport.
    Rsa15,
    /// RSA-OAEP key transport (MGF1 over SHA-1).
    RsaOaepMgf1p,
}

impl EncryptionAlgorithm {
    /// Returns the URI for this algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::TripleDesCbc => encryption_algorithms::TRIPLEDES_CBC,
            Self::Aes128Cbc => encryption_algorithms::AES128_CBC,
            Self::Aes192Cbc => encryption_algorithms::AES192_CBC,
            Self::Aes256Cbc => encryption_algorithms::AES256_CBC,
            Self::Rsa15 => encryption_algorithms::RSA_1_5,
            Self::RsaOaepMgf1p => encryption_algorithms::RSA_OAEP_MGF1P,
        }
    }

    /// Parses an algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            encryption_algorithms::TRIPLEDES_CBC => Some(Self::TripleDesCbc),
            encryption_algorithms::AES128_CBC => Some(Self::Aes128Cbc),
            encryption_algorithms::AES192_CBC => Some(Self::Aes192Cbc),
            encryption_algorithms::AES256_CBC => Some(Self::Aes256Cbc),
            encryption_algorithms::RSA_1_5 => Some(Self::Rsa15),
            encryption_algorithms::RSA_OAEP_MGF1P => Some(Self::RsaOaepMgf1p),
            _ => None,
        }
    }

    /// True for the block ciphers, false for the key-transport paddings.
    #[must_use]
    pub const fn is_symmetric(&self) -> bool {
        matches!(
            self,
            Self::TripleDesCbc | Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc
        )
    }

    const fn block(self) -> Option<BlockAlgorithm> {
        match self {
            Self::TripleDesCbc => Some(BlockAlgorithm::TripleDesCbc),
            Self::Aes128Cbc => Some(BlockAlgorithm::Aes128Cbc),
            Self::Aes192Cbc => Some(BlockAlgorithm::Aes192Cbc),
            Self::Aes256Cbc => Some(BlockAlgorithm::Aes256Cbc),
            Self::Rsa15 | Self::RsaOaepMgf1p => None,
        }
    }

    const fn transport(self) -> Option<KeyTransportAlgorithm> {
        match self {
            Self::Rsa15 => Some(KeyTransportAlgorithm::Pkcs1v15),
            Self::RsaOaepMgf1p => Some(KeyTransportAlgorithm::OaepMgf1Sha1),
            _ => None,
        }
    }
}

/// A key handle for the encryption subsystem, carrying its declared
/// algorithm alongside the key material.
#[derive(Clone)]
pub enum EncryptionKey {
    /// A symmetric content-encryption key.
    Symmetric {
        /// Declared algorithm (must be one of the block ciphers).
        algorithm: EncryptionAlgorithm,
        /// Raw key bytes.
        key: Vec<u8>,
    },
    /// An RSA public key for encrypting (wrapping a session key).
    RsaPublic {
        /// Declared key-transport algorithm.
        algorithm: EncryptionAlgorithm,
        /// SubjectPublicKeyInfo DER.
        spki_der: Vec<u8>,
    },
    /// An RSA private key for decrypting (unwrapping a session key).
    RsaPrivate {
        /// Declared key-transport algorithm.
        algorithm: EncryptionAlgorithm,
        /// PKCS#8 or PKCS#1 DER.
        key_der: Vec<u8>,
    },
}

impl EncryptionKey {
    /// The algorithm this key is declared for.
    #[must_use]
    pub const fn algorithm(&self) -> EncryptionAlgorithm {
        match self {
            Self::Symmetric { algorithm, .. }
            | Self::RsaPublic { algorithm, .. }
            | Self::RsaPrivate { algorithm, .. } => *algorithm,
        }
    }

    /// Convenience constructor for a symmetric key.
    pub fn symmetric(algorithm: EncryptionAlgorithm, key: Vec<u8>) -> SamlResult<Self> {
        let block = algorithm.block().ok_or_else(|| {
            SamlError::UnsupportedKeyType(format!(
                "{} is not a symmetric content algorithm",
                algorithm.uri()
            ))
        })?;
        if key.len() != block.key_len() {
            return Err(SamlError::UnsupportedKeyType(format!(
                "{} requires a {}-byte key, got {}",
                algorithm.uri(),
                block.key_len(),
                key.len()
            )));
        }
        Ok(Self::Symmetric { algorithm, key })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        match self {
            Self::Symmetric { algorithm, .. } => {
                write!(f, "EncryptionKey::Symmetric({})", algorithm.uri())
            }
            Self::RsaPublic { algorithm, .. } => {
                write!(f, "EncryptionKey::RsaPublic({})", algorithm.uri())
            }
            Self::RsaPrivate { algorithm, .. } => {
                write!(f, "EncryptionKey::RsaPrivate({})", algorithm.uri())
            }
        }
    }
}

/// An opaque encrypted element (`xenc:EncryptedData` and its wrapped key).
#[derive(Debug, Clone)]
pub struct EncryptedElement {
    encrypted_data: Element,
}

impl EncryptedElement {
    /// Wraps an already-parsed `EncryptedData` element.
    #[must_use]
    pub fn from_element(encrypted_data: Element) -> Self {
        Self { encrypted_data }
    }

    /// Extracts the `EncryptedData` child of a wrapper such as
    /// `EncryptedAssertion` or `EncryptedID`.
    pub fn from_wrapper(wrapper: &Element) -> SamlResult<Self> {
        let data = wrapper.required_child("EncryptedData")?;
        Ok(Self {
            encrypted_data: data.clone(),
        })
    }

    /// The underlying `EncryptedData` element.
    #[must_use]
    pub fn element(&self) -> &Element {
        &self.encrypted_data
    }

    /// Wraps the encrypted data under the given qualified wrapper name.
    #[must_use]
    pub fn to_wrapper(&self, qname: &str) -> Element {
        Element::new(qname).with_child(self.encrypted_data.clone())
    }

    /// The content-encryption algorithm declared in the message, if any.
    #[must_use]
    pub fn content_algorithm(&self) -> Option<EncryptionAlgorithm> {
        self.encrypted_data
            .children_named("EncryptionMethod")
            .next()
            .and_then(|m| m.attr("Algorithm"))
            .and_then(EncryptionAlgorithm::from_uri)
    }
}

fn cipher_value(parent: &Element) -> SamlResult<Vec<u8>> {
    let data = parent.required_child("CipherData")?;
    let value = data.required_child("CipherValue")?.text();
    let stripped: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(stripped)
        .map_err(|e| SamlError::DecryptionFailed(format!("CipherValue is not base64: {e}")))
}

fn cipher_data_element(bytes: &[u8]) -> Element {
    Element::new("xenc:CipherData")
        .with_child(Element::new("xenc:CipherValue").with_text(BASE64.encode(bytes)))
}

fn seal(block: BlockAlgorithm, key: &[u8], plaintext: &[u8]) -> SamlResult<Vec<u8>> {
    let iv = random_bytes(block.iv_len());
    let ct = cbc_encrypt(block, key, &iv, plaintext)
        .map_err(|e| SamlError::EncryptionFailed(e.to_string()))?;
    let mut out = iv;
    out.extend_from_slice(&ct);
    Ok(out)
}

fn open(block: BlockAlgorithm, key: &[u8], data: &[u8]) -> SamlResult<Vec<u8>> {
    if data.len() <= block.iv_len() {
        return Err(SamlError::DecryptionFailed(
            "ciphertext shorter than its IV".to_string(),
        ));
    }
    let (iv, ct) = data.split_at(block.iv_len());
    cbc_decrypt(block, key, iv, ct).map_err(|e| SamlError::DecryptionFailed(e.to_string()))
}

/// Encrypts an element with the given key.
///
/// A symmetric key encrypts the content directly. An RSA public key causes
/// a fresh AES-128-CBC session key to be generated; the content is
/// encrypted with the session key and the session key is wrapped with the
/// RSA key and embedded as the element's KeyInfo.
pub fn encrypt_element(plain: &Element, key: &EncryptionKey) -> SamlResult<EncryptedElement> {
    let plaintext = plain.to_xml();

    let mut encrypted = Element::new("xenc:EncryptedData")
        .with_attr("xmlns:xenc", crate::types::XMLENC_NS)
        .with_attr("Type", "http://www.w3.org/2001/04/xmlenc#Element");

    match key {
        EncryptionKey::Symmetric { algorithm, key } => {
            let block = algorithm.block().ok_or_else(|| {
                SamlError::UnsupportedKeyType(format!(
                    "{} is not a content-encryption algorithm",
                    algorithm.uri()
                ))
            })?;
            encrypted.push(Element::new("xenc:EncryptionMethod").with_attr("Algorithm", algorithm.uri()));
            encrypted.push(cipher_data_element(&seal(block, key, plaintext.as_bytes())?));
        }
        EncryptionKey::RsaPublic {
            algorithm,
            spki_der,
        } => {
            let transport = algorithm.transport().ok_or_else(|| {
                SamlError::UnsupportedKeyType(format!(
                    "{} is not an RSA key-transport algorithm",
                    algorithm.uri()
                ))
            })?;
            let session = random_bytes(BlockAlgorithm::Aes128Cbc.key_len());
            let wrapped = rsa_wrap_key(spki_der, &session, transport)
                .map_err(|e| SamlError::EncryptionFailed(e.to_string()))?;

            encrypted.push(
                Element::new("xenc:EncryptionMethod")
                    .with_attr("Algorithm", EncryptionAlgorithm::Aes128Cbc.uri()),
            );
            encrypted.push(
                Element::new("ds:KeyInfo")
                    .with_attr("xmlns:ds", crate::types::XMLDSIG_NS)
                    .with_child(
                        Element::new("xenc:EncryptedKey")
                            .with_child(
                                Element::new("xenc:EncryptionMethod")
                                    .with_attr("Algorithm", algorithm.uri()),
                            )
                            .with_child(cipher_data_element(&wrapped)),
                    ),
            );
            encrypted.push(cipher_data_element(&seal(
                BlockAlgorithm::Aes128Cbc,
                &session,
                plaintext.as_bytes(),
            )?));
        }
        EncryptionKey::RsaPrivate { .. } => {
            return Err(SamlError::UnsupportedKeyType(
                "an RSA private key cannot be used for encryption".to_string(),
            ));
        }
    }

    Ok(EncryptedElement::from_element(encrypted))
}

/// Decrypts an encrypted element back into an XML element.
///
/// The decrypted fragment may lack ancestor namespace declarations, so it
/// is re-wrapped inside a synthetic root that re-declares the SAML
/// assertion and XSI namespaces before re-parsing.
pub fn decrypt_element(enc: &EncryptedElement, key: &EncryptionKey) -> SamlResult<Element> {
    let data = enc.element();

    let content_uri = data
        .required_child("EncryptionMethod")?
        .attr("Algorithm")
        .ok_or_else(|| SamlError::MissingElement("EncryptionMethod Algorithm".to_string()))?
        .to_string();
    let content_alg = EncryptionAlgorithm::from_uri(&content_uri)
        .filter(|a| a.is_symmetric())
        .ok_or_else(|| {
            SamlError::DecryptionFailed(format!("unknown content algorithm: {content_uri}"))
        })?;
    let block = content_alg
        .block()
        .ok_or_else(|| SamlError::DecryptionFailed("non-symmetric content algorithm".into()))?;

    let wrapped_key = data
        .optional_child("KeyInfo")?
        .map(|ki| ki.optional_child("EncryptedKey"))
        .transpose()?
        .flatten();

    let session_key: Vec<u8> = if let Some(encrypted_key) = wrapped_key {
        let declared_uri = encrypted_key
            .required_child("EncryptionMethod")?
            .attr("Algorithm")
            .ok_or_else(|| SamlError::MissingElement("EncryptedKey Algorithm".to_string()))?
            .to_string();
        let declared = EncryptionAlgorithm::from_uri(&declared_uri).ok_or_else(|| {
            SamlError::DecryptionFailed(format!("unknown key-transport algorithm: {declared_uri}"))
        })?;

        let EncryptionKey::RsaPrivate {
            algorithm: supplied,
            key_der,
        } = key
        else {
            return Err(SamlError::UnsupportedKeyType(
                "message carries a wrapped key; an RSA private key is required".to_string(),
            ));
        };

        // RSA-1.5 key handles are accepted for OAEP messages: the paddings
        // differ but the key material format is the same.
        let compatible = *supplied == declared
            || (*supplied == EncryptionAlgorithm::Rsa15
                && declared == EncryptionAlgorithm::RsaOaepMgf1p);
        if !compatible {
            return Err(SamlError::AlgorithmMismatch {
                declared: declared.uri().to_string(),
                supplied: supplied.uri().to_string(),
            });
        }

        let transport = declared
            .transport()
            .ok_or_else(|| SamlError::DecryptionFailed("bad key-transport algorithm".into()))?;
        let wrapped = cipher_value(encrypted_key)?;
        let session = rsa_unwrap_key(key_der, &wrapped, transport)
            .map_err(|e| SamlError::DecryptionFailed(e.to_string()))?;
        if session.len() != block.key_len() {
            return Err(SamlError::DecryptionFailed(format!(
                "unwrapped session key is {} bytes, {} requires {}",
                session.len(),
                content_alg.uri(),
                block.key_len()
            )));
        }
        session
    } else {
        let EncryptionKey::Symmetric {
            algorithm: supplied,
            key: material,
        } = key
        else {
            return Err(SamlError::AlgorithmMismatch {
                declared: content_alg.uri().to_string(),
                supplied: key.algorithm().uri().to_string(),
            });
        };
        if *supplied != content_alg {
            return Err(SamlError::AlgorithmMismatch {
                declared: content_alg.uri().to_string(),
                supplied: supplied.uri().to_string(),
            });
        }
        material.clone()
    };

    let ciphertext = cipher_value(data)?;
    let plaintext = open(block, &session_key, &ciphertext)?;
    let fragment = String::from_utf8(plaintext)
        .map_err(|e| SamlError::DecryptionFailed(format!("decrypted content is not UTF-8: {e}")))?;

    // Only a fragment of the original document was encrypted; re-declare
    // the namespaces an ancestor may have carried before re-parsing.
    let wrapped = format!(
        r#"<fragment xmlns:saml="{SAML_NS}" xmlns:xsi="{XSI_NS}">{fragment}</fragment>"#
    );
    let root = Element::parse(&wrapped)?;
    let result = root
        .child_elements()
        .next()
        .cloned()
        .ok_or(SamlError::MissingDecryptedContent);
    result
}

/// Encrypts a NameID into the opaque form carried by `EncryptedID`.
pub fn encrypt_name_id(name_id: &NameId, key: &EncryptionKey) -> SamlResult<EncryptedElement> {
    encrypt_element(&name_id.to_element("saml:NameID"), key)
}

/// Decrypts an `EncryptedID` blob back into a NameID.
pub fn decrypt_name_id(enc: &EncryptedElement, key: &EncryptionKey) -> SamlResult<NameId> {
    let el = decrypt_element(enc, key)?;
    if el.local_name() != "NameID" {
        return Err(SamlError::DecryptionFailed(format!(
            "decrypted element is {}, expected NameID",
            el.local_name()
        )));
    }
    NameId::from_element(&el)
}
