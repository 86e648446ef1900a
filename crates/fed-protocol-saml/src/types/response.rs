//! SAML Response.
//!
//! The response message carrying assertions (plain or encrypted) from the
//! IdP to a service provider.

use chrono::{DateTime, Utc};

use crate::encryption::EncryptedElement;
use crate::error::{SamlError, SamlResult};
use crate::signature::SignedElement;
use crate::types::{
    declare_message_namespaces, format_instant, new_message_id, parse_instant, require_attr,
    require_version, Assertion, Status,
};
use crate::xml::Element;

/// SAML Response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Unique identifier for this response.
    pub id: String,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the identity provider that issued this response.
    pub issuer: String,

    /// The ID of the request this response answers.
    pub in_response_to: Option<String>,

    /// The URL where this response was sent.
    pub destination: Option<String>,

    /// The status of the response.
    pub status: Status,

    /// Plain assertions carried by this response.
    pub assertions: Vec<Assertion>,

    /// Encrypted assertions carried by this response.
    pub encrypted_assertions: Vec<EncryptedElement>,

    /// Opaque relay state carried alongside the message.
    pub relay_state: Option<String>,

    source: Option<Element>,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            in_response_to: None,
            destination: None,
            status: Status::success(),
            assertions: Vec::new(),
            encrypted_assertions: Vec::new(),
            relay_state: None,
            source: None,
        }
    }

    /// Creates an error response carrying the protocol status for a
    /// terminal error.
    #[must_use]
    pub fn from_error(issuer: impl Into<String>, err: &SamlError) -> Self {
        Self {
            status: Status::from_error(err),
            ..Self::success(issuer)
        }
    }

    /// Sets the request ID this response answers.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds a plain assertion.
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Adds an encrypted assertion.
    #[must_use]
    pub fn with_encrypted_assertion(mut self, assertion: EncryptedElement) -> Self {
        self.encrypted_assertions.push(assertion);
        self
    }

    /// Sets the relay state.
    #[must_use]
    pub fn with_relay_state(mut self, state: impl Into<String>) -> Self {
        self.relay_state = Some(state.into());
        self
    }

    /// Returns true if the top-level status code is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The first plain assertion, if any.
    #[must_use]
    pub fn first_assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }

    /// Parses a Response document.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let el = Element::parse(xml)?;
        if el.local_name() != "Response" {
            return Err(SamlError::XmlParse(format!(
                "expected Response, got {}",
                el.local_name()
            )));
        }
        require_version(&el)?;

        let id = require_attr(&el, "ID")?;
        let issue_instant = parse_instant(&require_attr(&el, "IssueInstant")?)?;
        let issuer = el.required_child("Issuer")?.text();
        if issuer.is_empty() {
            return Err(SamlError::MissingElement("Issuer".to_string()));
        }
        let status = Status::from_element(el.required_child("Status")?)?;

        let mut assertions = Vec::new();
        for assertion_el in el.children_named("Assertion") {
            assertions.push(Assertion::from_element(assertion_el.clone(), false)?);
        }
        let mut encrypted_assertions = Vec::new();
        for enc_el in el.children_named("EncryptedAssertion") {
            encrypted_assertions.push(EncryptedElement::from_wrapper(enc_el)?);
        }

        Ok(Self {
            id,
            issue_instant,
            issuer,
            in_response_to: el.attr("InResponseTo").map(str::to_string),
            destination: el.attr("Destination").map(str::to_string),
            status,
            assertions,
            encrypted_assertions,
            relay_state: None,
            source: Some(el),
        })
    }

    /// Serializes this response to an element tree.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:Response");
        declare_message_namespaces(&mut el);
        el.set_attr("ID", self.id.clone());
        el.set_attr("Version", "2.0");
        el.set_attr("IssueInstant", format_instant(self.issue_instant));
        if let Some(in_response_to) = &self.in_response_to {
            el.set_attr("InResponseTo", in_response_to);
        }
        if let Some(destination) = &self.destination {
            el.set_attr("Destination", destination);
        }

        el.push(Element::new("saml:Issuer").with_text(self.issuer.clone()));
        el.push(self.status.to_element());
        for assertion in &self.assertions {
            el.push(assertion.to_element());
        }
        for encrypted in &self.encrypted_assertions {
            el.push(encrypted.to_wrapper("saml:EncryptedAssertion"));
        }
        el
    }

    /// Serializes this response to XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

impl SignedElement for Response {
    fn signed_source(&self) -> Option<(&Element, bool)> {
        self.source.as_ref().map(|el| (el, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::status_codes;

    #[test]
    fn response_roundtrip_with_assertion() {
        let response = Response::success("https://idp.example.com")
            .in_response_to("_req1")
            .with_destination("https://sp.example.com/acs")
            .with_assertion(Assertion::new("https://idp.example.com"));

        let parsed = Response::parse(&response.to_xml()).unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed.id, response.id);
        assert_eq!(parsed.in_response_to.as_deref(), Some("_req1"));
        assert_eq!(parsed.assertions.len(), 1);
        assert_eq!(parsed.assertions[0].issuer, "https://idp.example.com");
    }

    #[test]
    fn error_response_carries_status() {
        let err = SamlError::NoUsableEndpoint("nothing matched".into());
        let response = Response::from_error("https://idp.example.com", &err);
        assert!(!response.is_success());
        assert_eq!(response.status.status_code.value, status_codes::RESPONDER);

        let parsed = Response::parse(&response.to_xml()).unwrap();
        assert!(!parsed.is_success());
        assert!(parsed
            .status
            .status_message
            .as_deref()
            .unwrap()
            .contains("nothing matched"));
    }

    #[test]
    fn encrypted_assertion_roundtrip() {
        use crate::encryption::{
            decrypt_element, encrypt_element, EncryptionAlgorithm, EncryptionKey,
        };

        let key = EncryptionKey::symmetric(
            EncryptionAlgorithm::Aes256Cbc,
            fed_crypto::random_bytes(32),
        )
        .unwrap();
        let assertion = Assertion::new("https://idp.example.com");
        let encrypted = encrypt_element(&assertion.to_element(), &key).unwrap();

        let response = Response::success("https://idp.example.com")
            .with_encrypted_assertion(encrypted);
        let parsed = Response::parse(&response.to_xml()).unwrap();
        assert!(parsed.assertions.is_empty());
        assert_eq!(parsed.encrypted_assertions.len(), 1);

        let decrypted = decrypt_element(&parsed.encrypted_assertions[0], &key).unwrap();
        let recovered = Assertion::from_element(decrypted, false).unwrap();
        assert_eq!(recovered.id, assertion.id);
        assert_eq!(recovered.issuer, "https://idp.example.com");
    }

    #[test]
    fn missing_status_is_rejected() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z"><saml:Issuer>idp</saml:Issuer></samlp:Response>"#;
        assert!(matches!(
            Response::parse(xml),
            Err(SamlError::MissingElement(_))
        ));
    }
}
