//! XML Signature support for SAML messages and assertions.
//!
//! Outbound signatures use exclusive C14N with the enveloped-signature
//! transform and a SHA-1 digest, and the `Signature` element is inserted
//! immediately after the `Issuer` child; several deployed consumers
//! require exactly that shape. Validation is fail-closed: an absent
//! signature is the normal `false` outcome, but any structural or
//! cryptographic problem with a present signature is an error.

mod signer;
mod validator;

pub use signer::XmlSigner;
pub use validator::{extract_certificates, validate_enveloped, VerificationKey};

use crate::error::SamlResult;
use crate::types::{
    canonicalization_algorithms, digest_algorithms, signature_algorithms,
};
use crate::xml::Element;

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-1 (deployed-interop default).
    #[default]
    RsaSha1,
    /// RSA with SHA-256.
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => signature_algorithms::RSA_SHA1,
            Self::RsaSha256 => signature_algorithms::RSA_SHA256,
            Self::RsaSha384 => signature_algorithms::RSA_SHA384,
            Self::RsaSha512 => signature_algorithms::RSA_SHA512,
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            signature_algorithms::RSA_SHA1 => Some(Self::RsaSha1),
            signature_algorithms::RSA_SHA256 => Some(Self::RsaSha256),
            signature_algorithms::RSA_SHA384 => Some(Self::RsaSha384),
            signature_algorithms::RSA_SHA512 => Some(Self::RsaSha512),
            _ => None,
        }
    }

    /// The digest this algorithm pairs with by default.
    #[must_use]
    pub const fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::RsaSha1 => DigestAlgorithm::Sha1,
            Self::RsaSha256 => DigestAlgorithm::Sha256,
            Self::RsaSha384 => DigestAlgorithm::Sha384,
            Self::RsaSha512 => DigestAlgorithm::Sha512,
        }
    }

    pub(crate) const fn rsa_digest(&self) -> fed_crypto::RsaDigest {
        match self {
            Self::RsaSha1 => fed_crypto::RsaDigest::Sha1,
            Self::RsaSha256 => fed_crypto::RsaDigest::Sha256,
            Self::RsaSha384 => fed_crypto::RsaDigest::Sha384,
            Self::RsaSha512 => fed_crypto::RsaDigest::Sha512,
        }
    }
}

/// Digest algorithm used for reference digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-1 (deployed-interop default).
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Returns the URI for this digest algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => digest_algorithms::SHA1,
            Self::Sha256 => digest_algorithms::SHA256,
            Self::Sha384 => digest_algorithms::SHA384,
            Self::Sha512 => digest_algorithms::SHA512,
        }
    }

    /// Parses a digest algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            digest_algorithms::SHA1 => Some(Self::Sha1),
            digest_algorithms::SHA256 => Some(Self::Sha256),
            digest_algorithms::SHA384 => Some(Self::Sha384),
            digest_algorithms::SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }

    pub(crate) fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => fed_crypto::sha1(data),
            Self::Sha256 => fed_crypto::sha256(data),
            Self::Sha384 => fed_crypto::sha384(data),
            Self::Sha512 => fed_crypto::sha512(data),
        }
    }
}

/// Canonicalization algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanonicalizationAlgorithm {
    /// Exclusive C14N without comments.
    #[default]
    ExclusiveC14N,
    /// C14N without comments.
    C14N,
}

impl CanonicalizationAlgorithm {
    /// Returns the URI for this canonicalization algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::ExclusiveC14N => canonicalization_algorithms::EXCLUSIVE_C14N,
            Self::C14N => canonicalization_algorithms::C14N,
        }
    }

    /// Parses a canonicalization algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            canonicalization_algorithms::EXCLUSIVE_C14N => Some(Self::ExclusiveC14N),
            canonicalization_algorithms::C14N => Some(Self::C14N),
            _ => None,
        }
    }
}

/// Configuration for signature creation.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// The signature algorithm to use.
    pub algorithm: SignatureAlgorithm,
    /// The reference digest algorithm to use.
    pub digest: DigestAlgorithm,
    /// The canonicalization algorithm to use.
    pub canonicalization: CanonicalizationAlgorithm,
    /// Whether to embed the certificate chain in the signature's KeyInfo.
    pub include_certificates: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::RsaSha1,
            digest: DigestAlgorithm::Sha1,
            canonicalization: CanonicalizationAlgorithm::ExclusiveC14N,
            include_certificates: true,
        }
    }
}

impl SignatureConfig {
    /// Creates a configuration with the given algorithm and its paired
    /// digest.
    #[must_use]
    pub const fn with_algorithm(algorithm: SignatureAlgorithm) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(),
            canonicalization: CanonicalizationAlgorithm::ExclusiveC14N,
            include_certificates: true,
        }
    }
}

/// Capability of any element that can carry an enveloped signature.
///
/// Assertions and the protocol message types do not share a common base,
/// so the signature surface is a trait rather than inheritance: each
/// implementor exposes the XML it was parsed from (if any), and validation
/// and certificate extraction run over that retained source.
pub trait SignedElement {
    /// The element this instance was parsed from, together with whether it
    /// was the document root. `None` for freshly constructed instances,
    /// which cannot carry an inbound signature.
    fn signed_source(&self) -> Option<(&Element, bool)>;

    /// Validates the enveloped signature against `key`.
    ///
    /// Returns `Ok(false)` when no signature element is present. A present
    /// but structurally or cryptographically invalid signature is an
    /// error; a valid one returns `Ok(true)`.
    fn validate_signature(&self, key: &VerificationKey) -> SamlResult<bool> {
        match self.signed_source() {
            None => Ok(false),
            Some((el, is_root)) => validate_enveloped(el, is_root, key),
        }
    }

    /// X.509 certificates embedded in the signature's KeyInfo, in document
    /// order, whitespace stripped. Empty when no signature is present.
    fn certificates(&self) -> SamlResult<Vec<String>> {
        match self.signed_source() {
            None => Ok(Vec::new()),
            Some((el, _)) => extract_certificates(el),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_algorithm_uri_roundtrip() {
        for alg in [
            SignatureAlgorithm::RsaSha1,
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
        ] {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()), Some(alg));
        }
    }

    #[test]
    fn paired_digests() {
        assert_eq!(SignatureAlgorithm::RsaSha1.digest(), DigestAlgorithm::Sha1);
        assert_eq!(
            SignatureAlgorithm::RsaSha256.digest(),
            DigestAlgorithm::Sha256
        );
    }

    #[test]
    fn default_config_is_the_interop_shape() {
        let config = SignatureConfig::default();
        assert_eq!(config.algorithm, SignatureAlgorithm::RsaSha1);
        assert_eq!(config.digest, DigestAlgorithm::Sha1);
        assert_eq!(
            config.canonicalization,
            CanonicalizationAlgorithm::ExclusiveC14N
        );
        assert!(config.include_certificates);
    }
}
