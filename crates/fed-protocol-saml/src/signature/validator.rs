//! XML Signature validation.
//!
//! Validation runs fail-closed over the retained parse tree of the inbound
//! document. The covered-node-set check (does the signature actually sign
//! the element being validated?) runs before any certificate material is
//! touched, so a wrapped or relocated signature never reaches the
//! cryptographic layer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{SamlError, SamlResult};
use crate::xml::Element;

use super::signer::pem_to_der;
use super::{DigestAlgorithm, SignatureAlgorithm};

/// A public key for signature verification.
#[derive(Debug, Clone)]
pub struct VerificationKey {
    spki_der: Vec<u8>,
}

impl VerificationKey {
    /// Wraps a `SubjectPublicKeyInfo` DER blob.
    #[must_use]
    pub fn from_spki_der(spki_der: Vec<u8>) -> Self {
        Self { spki_der }
    }

    /// Extracts the public key from an X.509 certificate (DER).
    pub fn from_certificate_der(cert_der: &[u8]) -> SamlResult<Self> {
        use x509_parser::prelude::*;

        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| SamlError::Crypto(format!("failed to parse certificate: {e}")))?;
        Ok(Self {
            spki_der: cert.public_key().raw.to_vec(),
        })
    }

    /// Extracts the public key from a PEM-encoded X.509 certificate.
    pub fn from_certificate_pem(pem: &str) -> SamlResult<Self> {
        let der = pem_to_der(pem, "CERTIFICATE")
            .ok_or_else(|| SamlError::Crypto("invalid certificate PEM".to_string()))?;
        Self::from_certificate_der(&der)
    }

    /// The raw `SubjectPublicKeyInfo` DER.
    #[must_use]
    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }
}

/// Validates the enveloped signature of `el` against `key`.
///
/// Returns `Ok(false)` if no `Signature` child is present. With a
/// signature present, the covered-node-set check, the reference digest and
/// the cryptographic verification must all pass; any failure is a
/// [`SamlError::SignatureInvalid`].
pub fn validate_enveloped(
    el: &Element,
    is_document_root: bool,
    key: &VerificationKey,
) -> SamlResult<bool> {
    let mut signatures = el.children_named("Signature");
    let Some(signature) = signatures.next() else {
        return Ok(false);
    };
    if signatures.next().is_some() {
        return Err(SamlError::SignatureInvalid(
            "more than one Signature element".to_string(),
        ));
    }

    let signed_info = signature.required_child("SignedInfo").map_err(|_| {
        SamlError::SignatureInvalid("Signature has no SignedInfo".to_string())
    })?;

    // Covered-node-set check, before anything cryptographic: the reference
    // must point at the element being validated (or the whole document when
    // the element is its root).
    let reference = signed_info.required_child("Reference").map_err(|_| {
        SamlError::SignatureInvalid("SignedInfo has no Reference".to_string())
    })?;
    let reference_uri = reference.attr("URI").unwrap_or("");
    let own_id = el.attr("ID").or_else(|| el.attr("Id"));
    let covers_element = match reference_uri.strip_prefix('#') {
        Some(ref_id) => {
            // The ID must both match this element and resolve to it; a
            // second element smuggled in under the same ID must not win.
            own_id == Some(ref_id) && std::ptr::eq(el.find_by_id(ref_id).unwrap_or(el), el)
        }
        None => reference_uri.is_empty() && is_document_root,
    };
    if !covers_element {
        return Err(SamlError::SignatureInvalid(format!(
            "signed node-set does not cover the validated element (URI \"{reference_uri}\", element ID {own_id:?})"
        )));
    }

    let signature_method = signed_info
        .required_child("SignatureMethod")
        .ok()
        .and_then(|m| m.attr("Algorithm"))
        .map(str::to_string)
        .ok_or_else(|| SamlError::SignatureInvalid("missing SignatureMethod".to_string()))?;
    let algorithm = SignatureAlgorithm::from_uri(&signature_method).ok_or_else(|| {
        SamlError::SignatureInvalid(format!("unknown signature algorithm: {signature_method}"))
    })?;

    let digest_method = reference
        .required_child("DigestMethod")
        .ok()
        .and_then(|m| m.attr("Algorithm"))
        .map(str::to_string)
        .ok_or_else(|| SamlError::SignatureInvalid("missing DigestMethod".to_string()))?;
    let digest_algorithm = DigestAlgorithm::from_uri(&digest_method).ok_or_else(|| {
        SamlError::SignatureInvalid(format!("unknown digest algorithm: {digest_method}"))
    })?;

    let expected_digest = strip_whitespace(
        &reference
            .required_child("DigestValue")
            .map_err(|_| SamlError::SignatureInvalid("missing DigestValue".to_string()))?
            .text(),
    );

    // Reference digest: the element without its enveloped signature.
    let mut unsigned = el.clone();
    unsigned.remove_child("Signature");
    let actual_digest =
        BASE64.encode(digest_algorithm.digest(unsigned.canonical_xml().as_bytes()));
    if actual_digest != expected_digest {
        tracing::warn!(
            expected = %expected_digest,
            actual = %actual_digest,
            "reference digest mismatch"
        );
        return Err(SamlError::SignatureInvalid(
            "reference digest mismatch".to_string(),
        ));
    }

    // Cryptographic verification over the canonicalized SignedInfo.
    let signature_value = strip_whitespace(
        &signature
            .required_child("SignatureValue")
            .map_err(|_| SamlError::SignatureInvalid("missing SignatureValue".to_string()))?
            .text(),
    );
    let signature_bytes = BASE64
        .decode(&signature_value)
        .map_err(|e| SamlError::SignatureInvalid(format!("SignatureValue is not base64: {e}")))?;

    let valid = fed_crypto::rsa_verify(
        key.spki_der(),
        signed_info.canonical_xml().as_bytes(),
        &signature_bytes,
        algorithm.rsa_digest(),
    )
    .map_err(|e| SamlError::SignatureInvalid(format!("verification error: {e}")))?;

    if !valid {
        tracing::warn!(algorithm = %signature_method, "signature verification failed");
        return Err(SamlError::SignatureInvalid(
            "signature verification failed".to_string(),
        ));
    }

    tracing::debug!(algorithm = %signature_method, "signature validated");
    Ok(true)
}

/// X.509 certificates embedded in the element's signature KeyInfo.
///
/// Document order is preserved and whitespace inside the base64 blocks is
/// stripped. An element without a signature yields an empty list.
pub fn extract_certificates(el: &Element) -> SamlResult<Vec<String>> {
    let mut signatures = el.children_named("Signature");
    let Some(signature) = signatures.next() else {
        return Ok(Vec::new());
    };
    if signatures.next().is_some() {
        return Err(SamlError::SignatureInvalid(
            "more than one Signature element".to_string(),
        ));
    }

    let mut certs = Vec::new();
    if let Some(key_info) = signature.optional_child("KeyInfo")? {
        for x509_data in key_info.children_named("X509Data") {
            for cert in x509_data.children_named("X509Certificate") {
                certs.push(strip_whitespace(&cert.text()));
            }
        }
    }
    Ok(certs)
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
