//! SAML Single Logout messages.

use chrono::{DateTime, Utc};

use crate::encryption::EncryptedElement;
use crate::error::{SamlError, SamlResult};
use crate::signature::SignedElement;
use crate::types::{
    declare_message_namespaces, format_instant, new_message_id, parse_instant, require_attr,
    require_version, NameId, Status, SubjectId,
};
use crate::xml::Element;

/// SAML Logout Request.
///
/// Sent to terminate an existing session. The subject identifier is
/// required and may arrive encrypted.
#[derive(Debug, Clone)]
pub struct LogoutRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the requester.
    pub issuer: String,

    /// The URL where this request was sent.
    pub destination: Option<String>,

    /// The subject to log out, plain or encrypted.
    pub subject_id: SubjectId,

    /// Session indexes to terminate.
    pub session_indexes: Vec<String>,

    /// Time after which the request is no longer valid.
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Reason for the logout.
    pub reason: Option<String>,

    /// Opaque relay state carried alongside the message.
    pub relay_state: Option<String>,

    source: Option<Element>,
}

impl LogoutRequest {
    /// Creates a new logout request.
    #[must_use]
    pub fn new(issuer: impl Into<String>, name_id: NameId) -> Self {
        Self {
            id: new_message_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            subject_id: SubjectId::Plain(name_id),
            session_indexes: Vec::new(),
            not_on_or_after: None,
            reason: None,
            relay_state: None,
            source: None,
        }
    }

    /// Creates a logout request carrying an encrypted subject identifier.
    #[must_use]
    pub fn with_encrypted_name_id(issuer: impl Into<String>, encrypted: EncryptedElement) -> Self {
        Self {
            subject_id: SubjectId::Encrypted(encrypted),
            ..Self::new(issuer, NameId::new("placeholder"))
        }
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds a session index to terminate.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_indexes.push(index.into());
        self
    }

    /// Sets the relay state.
    #[must_use]
    pub fn with_relay_state(mut self, state: impl Into<String>) -> Self {
        self.relay_state = Some(state.into());
        self
    }

    /// The plain name identifier; fails while only the encrypted form is
    /// populated.
    pub fn name_id(&self) -> SamlResult<&NameId> {
        self.subject_id.name_id()
    }

    /// Parses a LogoutRequest document.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let el = Element::parse(xml)?;
        if el.local_name() != "LogoutRequest" {
            return Err(SamlError::XmlParse(format!(
                "expected LogoutRequest, got {}",
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

        let name_id = el.optional_child("NameID")?;
        let encrypted_id = el.optional_child("EncryptedID")?;
        let subject_id = match (name_id, encrypted_id) {
            (Some(_), Some(_)) => {
                return Err(SamlError::XmlParse(
                    "NameID and EncryptedID are mutually exclusive".to_string(),
                ));
            }
            (Some(plain), None) => SubjectId::Plain(NameId::from_element(plain)?),
            (None, Some(enc)) => SubjectId::Encrypted(EncryptedElement::from_wrapper(enc)?),
            (None, None) => return Err(SamlError::MissingElement("NameID".to_string())),
        };

        let not_on_or_after = el.attr("NotOnOrAfter").map(parse_instant).transpose()?;
        let session_indexes = el
            .children_named("SessionIndex")
            .map(|s| s.text())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            id,
            issue_instant,
            issuer,
            destination: el.attr("Destination").map(str::to_string),
            subject_id,
            session_indexes,
            not_on_or_after,
            reason: el.attr("Reason").map(str::to_string),
            relay_state: None,
            source: Some(el),
        })
    }

    /// Serializes this request to an element tree.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:LogoutRequest");
        declare_message_namespaces(&mut el);
        el.set_attr("ID", self.id.clone());
        el.set_attr("Version", "2.0");
        el.set_attr("IssueInstant", format_instant(self.issue_instant));
        if let Some(destination) = &self.destination {
            el.set_attr("Destination", destination);
        }
        if let Some(t) = self.not_on_or_after {
            el.set_attr("NotOnOrAfter", format_instant(t));
        }
        if let Some(reason) = &self.reason {
            el.set_attr("Reason", reason);
        }

        el.push(Element::new("saml:Issuer").with_text(self.issuer.clone()));
        match &self.subject_id {
            SubjectId::Plain(name_id) => el.push(name_id.to_element("saml:NameID")),
            SubjectId::Encrypted(enc) => el.push(enc.to_wrapper("saml:EncryptedID")),
        }
        for index in &self.session_indexes {
            el.push(Element::new("samlp:SessionIndex").with_text(index.clone()));
        }
        el
    }

    /// Serializes this request to XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

impl SignedElement for LogoutRequest {
    fn signed_source(&self) -> Option<(&Element, bool)> {
        self.source.as_ref().map(|el| (el, true))
    }
}

/// SAML Logout Response.
#[derive(Debug, Clone)]
pub struct LogoutResponse {
    /// Unique identifier for this response.
    pub id: String,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the responder.
    pub issuer: String,

    /// The ID of the request this response answers.
    pub in_response_to: Option<String>,

    /// The URL where this response was sent.
    pub destination: Option<String>,

    /// The status of the logout.
    pub status: Status,

    /// Opaque relay state carried alongside the message.
    pub relay_state: Option<String>,

    source: Option<Element>,
}

impl LogoutResponse {
    /// Creates a success logout response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            in_response_to: None,
            destination: None,
            status: Status::success(),
            relay_state: None,
            source: None,
        }
    }

    /// Creates a partial-logout response: top-level Success with the
    /// PartialLogout second-level code.
    #[must_use]
    pub fn partial_logout(issuer: impl Into<String>) -> Self {
        Self {
            status: Status::partial_logout(),
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

    /// Parses a LogoutResponse document.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let el = Element::parse(xml)?;
        if el.local_name() != "LogoutResponse" {
            return Err(SamlError::XmlParse(format!(
                "expected LogoutResponse, got {}",
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

        Ok(Self {
            id,
            issue_instant,
            issuer,
            in_response_to: el.attr("InResponseTo").map(str::to_string),
            destination: el.attr("Destination").map(str::to_string),
            status,
            relay_state: None,
            source: Some(el),
        })
    }

    /// Serializes this response to an element tree.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:LogoutResponse");
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
        el
    }

    /// Serializes this response to XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

impl SignedElement for LogoutResponse {
    fn signed_source(&self) -> Option<(&Element, bool)> {
        self.source.as_ref().map(|el| (el, true))
    }
}
