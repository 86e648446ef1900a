//! XML Signature creation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{SamlError, SamlResult};
use crate::types::{ENVELOPED_SIGNATURE_TRANSFORM, XMLDSIG_NS};
use crate::xml::Element;

use super::SignatureConfig;

/// XML document signer.
///
/// Signs protocol elements with the configured private key and embeds the
/// certificate chain in the signature's KeyInfo.
pub struct XmlSigner {
    /// The private key in DER format (PKCS#8 or PKCS#1).
    private_key_der: Vec<u8>,
    /// The X.509 certificate chain in DER format, leaf first.
    certificate_chain_der: Vec<Vec<u8>>,
    /// Signature configuration.
    config: SignatureConfig,
}

impl XmlSigner {
    /// Creates a new signer.
    #[must_use]
    pub fn new(private_key_der: Vec<u8>, certificate_chain_der: Vec<Vec<u8>>) -> Self {
        Self {
            private_key_der,
            certificate_chain_der,
            config: SignatureConfig::default(),
        }
    }

    /// Creates a signer from PEM-encoded key and certificates.
    pub fn from_pem(private_key_pem: &str, certificates_pem: &[&str]) -> SamlResult<Self> {
        let private_key_der = pem_to_der(private_key_pem, "PRIVATE KEY")
            .or_else(|| pem_to_der(private_key_pem, "RSA PRIVATE KEY"))
            .ok_or_else(|| SamlError::Crypto("invalid private key PEM".to_string()))?;

        let mut chain = Vec::new();
        for pem in certificates_pem {
            let der = pem_to_der(pem, "CERTIFICATE")
                .ok_or_else(|| SamlError::Crypto("invalid certificate PEM".to_string()))?;
            chain.push(der);
        }

        Ok(Self::new(private_key_der, chain))
    }

    /// Sets the signature configuration.
    #[must_use]
    pub fn with_config(mut self, config: SignatureConfig) -> Self {
        self.config = config;
        self
    }

    /// Signs an element in place.
    ///
    /// The element must carry `ID="reference_id"`. The reference covers the
    /// element with the enveloped-signature and exclusive-C14N transforms;
    /// after computing the signature the `Signature` element is inserted
    /// immediately after the `Issuer` child. Re-signing replaces any
    /// existing signature.
    pub fn sign_element(&self, el: &mut Element, reference_id: &str) -> SamlResult<()> {
        if el.attr("ID") != Some(reference_id) {
            return Err(SamlError::SignatureCreation(format!(
                "element does not carry ID=\"{reference_id}\""
            )));
        }

        // Mutating a signed element invalidates its signature, so a fresh
        // signing pass always starts from the unsigned form.
        el.remove_child("Signature");

        let digest = self.config.digest.digest(el.canonical_xml().as_bytes());
        let signed_info = self.build_signed_info(reference_id, &BASE64.encode(digest));

        let signature_value = fed_crypto::rsa_sign(
            &self.private_key_der,
            signed_info.canonical_xml().as_bytes(),
            self.config.algorithm.rsa_digest(),
        )
        .map_err(|e| SamlError::SignatureCreation(e.to_string()))?;

        let mut signature =
            Element::new("ds:Signature").with_attr("xmlns:ds", XMLDSIG_NS);
        signature.push(signed_info);
        signature.push(
            Element::new("ds:SignatureValue").with_text(BASE64.encode(&signature_value)),
        );

        if self.config.include_certificates && !self.certificate_chain_der.is_empty() {
            let mut x509_data = Element::new("ds:X509Data");
            for cert in &self.certificate_chain_der {
                x509_data.push(
                    Element::new("ds:X509Certificate").with_text(BASE64.encode(cert)),
                );
            }
            signature.push(Element::new("ds:KeyInfo").with_child(x509_data));
        }

        el.insert_after("Issuer", signature);
        Ok(())
    }

    fn build_signed_info(&self, reference_id: &str, digest_b64: &str) -> Element {
        // SignedInfo declares its own ds prefix so that it canonicalizes to
        // the same bytes standalone (at signing time) and in the document
        // (at verification time).
        Element::new("ds:SignedInfo")
            .with_attr("xmlns:ds", XMLDSIG_NS)
            .with_child(
                Element::new("ds:CanonicalizationMethod")
                    .with_attr("Algorithm", self.config.canonicalization.uri()),
            )
            .with_child(
                Element::new("ds:SignatureMethod")
                    .with_attr("Algorithm", self.config.algorithm.uri()),
            )
            .with_child(
                Element::new("ds:Reference")
                    .with_attr("URI", format!("#{reference_id}"))
                    .with_child(
                        Element::new("ds:Transforms")
                            .with_child(
                                Element::new("ds:Transform")
                                    .with_attr("Algorithm", ENVELOPED_SIGNATURE_TRANSFORM),
                            )
                            .with_child(
                                Element::new("ds:Transform")
                                    .with_attr("Algorithm", self.config.canonicalization.uri()),
                            ),
                    )
                    .with_child(
                        Element::new("ds:DigestMethod")
                            .with_attr("Algorithm", self.config.digest.uri()),
                    )
                    .with_child(Element::new("ds:DigestValue").with_text(digest_b64)),
            )
    }

    /// Creates a detached signature for the HTTP-Redirect binding.
    ///
    /// Redirect-binding signatures cover the query string rather than the
    /// XML; the returned value is the base64 signature for the `Signature`
    /// query parameter.
    pub fn sign_redirect_query(
        &self,
        saml_param: &str,
        encoded_message: &str,
        relay_state: Option<&str>,
    ) -> SamlResult<String> {
        let mut to_sign = format!("{}={}", saml_param, urlencoding::encode(encoded_message));
        if let Some(rs) = relay_state {
            to_sign.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
        }
        to_sign.push_str(&format!(
            "&SigAlg={}",
            urlencoding::encode(self.config.algorithm.uri())
        ));

        let signature = fed_crypto::rsa_sign(
            &self.private_key_der,
            to_sign.as_bytes(),
            self.config.algorithm.rsa_digest(),
        )
        .map_err(|e| SamlError::SignatureCreation(e.to_string()))?;

        Ok(BASE64.encode(signature))
    }
}

/// Extracts DER data from a PEM string.
pub(crate) fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = pem.find(&begin)? + begin.len();
    let end_pos = pem.find(&end)?;

    let b64_data: String = pem[start..end_pos]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    BASE64.decode(&b64_data).ok()
}
