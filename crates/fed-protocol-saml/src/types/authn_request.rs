//! SAML AuthnRequest.
//!
//! Authentication request sent by a service provider to the IdP. Unknown
//! or extension children are ignored on parse; known single-valued
//! children must not repeat.

use chrono::{DateTime, Utc};

use crate::error::{SamlError, SamlResult};
use crate::signature::SignedElement;
use crate::types::{
    declare_message_namespaces, format_instant, new_message_id, parse_instant, require_attr,
    require_version, NameIdPolicy, SamlBinding,
};
use crate::xml::Element;

/// SAML Authentication Request.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the service provider issuing the request.
    pub issuer: String,

    /// The URL where the request was sent.
    pub destination: Option<String>,

    /// The URL where the response should be sent.
    pub assertion_consumer_service_url: Option<String>,

    /// Index into the SP's assertion consumer service list.
    pub assertion_consumer_service_index: Option<u16>,

    /// Binding the SP requests for the response.
    pub protocol_binding: Option<String>,

    /// Name ID policy constraints.
    pub name_id_policy: Option<NameIdPolicy>,

    /// Requested authentication context.
    pub requested_authn_context: Option<RequestedAuthnContext>,

    /// Whether the IdP must re-authenticate the user.
    pub force_authn: bool,

    /// Whether the IdP must not interact with the user.
    pub is_passive: bool,

    /// Opaque relay state carried alongside the message.
    pub relay_state: Option<String>,

    /// The element this request was parsed from, if any.
    source: Option<Element>,
}

impl AuthnRequest {
    /// Creates a new authentication request.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            assertion_consumer_service_url: None,
            assertion_consumer_service_index: None,
            protocol_binding: None,
            name_id_policy: None,
            requested_authn_context: None,
            force_authn: false,
            is_passive: false,
            relay_state: None,
            source: None,
        }
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the protocol binding for the response.
    #[must_use]
    pub fn with_binding(mut self, binding: SamlBinding) -> Self {
        self.protocol_binding = Some(binding.uri().to_string());
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Sets the relay state.
    #[must_use]
    pub fn with_relay_state(mut self, state: impl Into<String>) -> Self {
        self.relay_state = Some(state.into());
        self
    }

    /// Returns the parsed protocol binding, if its URI is recognized.
    #[must_use]
    pub fn parsed_binding(&self) -> Option<SamlBinding> {
        self.protocol_binding
            .as_deref()
            .and_then(SamlBinding::from_uri)
    }

    /// True if the underlying XML carried a signature element.
    #[must_use]
    pub fn has_signature(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|el| el.children_named("Signature").next().is_some())
    }

    /// Parses an AuthnRequest document.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let el = Element::parse(xml)?;
        Self::from_element(el)
    }

    fn from_element(el: Element) -> SamlResult<Self> {
        if el.local_name() != "AuthnRequest" {
            return Err(SamlError::XmlParse(format!(
                "expected AuthnRequest, got {}",
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

        let name_id_policy = el
            .optional_child("NameIDPolicy")?
            .map(NameIdPolicy::from_element);
        let requested_authn_context = el
            .optional_child("RequestedAuthnContext")?
            .map(RequestedAuthnContext::from_element);

        let index = el
            .attr("AssertionConsumerServiceIndex")
            .map(|v| {
                v.parse::<u16>().map_err(|_| {
                    SamlError::XmlParse(format!("bad AssertionConsumerServiceIndex: {v}"))
                })
            })
            .transpose()?;

        Ok(Self {
            id,
            issue_instant,
            issuer,
            destination: el.attr("Destination").map(str::to_string),
            assertion_consumer_service_url: el
                .attr("AssertionConsumerServiceURL")
                .map(str::to_string),
            assertion_consumer_service_index: index,
            protocol_binding: el.attr("ProtocolBinding").map(str::to_string),
            name_id_policy,
            requested_authn_context,
            force_authn: el.attr("ForceAuthn") == Some("true"),
            is_passive: el.attr("IsPassive") == Some("true"),
            relay_state: None,
            source: Some(el),
        })
    }

    /// Serializes this request to an element tree.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:AuthnRequest");
        declare_message_namespaces(&mut el);
        el.set_attr("ID", self.id.clone());
        el.set_attr("Version", "2.0");
        el.set_attr("IssueInstant", format_instant(self.issue_instant));
        if let Some(destination) = &self.destination {
            el.set_attr("Destination", destination);
        }
        if let Some(url) = &self.assertion_consumer_service_url {
            el.set_attr("AssertionConsumerServiceURL", url);
        }
        if let Some(index) = self.assertion_consumer_service_index {
            el.set_attr("AssertionConsumerServiceIndex", index.to_string());
        }
        if let Some(binding) = &self.protocol_binding {
            el.set_attr("ProtocolBinding", binding);
        }
        if self.force_authn {
            el.set_attr("ForceAuthn", "true");
        }
        if self.is_passive {
            el.set_attr("IsPassive", "true");
        }

        el.push(Element::new("saml:Issuer").with_text(self.issuer.clone()));
        if let Some(policy) = &self.name_id_policy {
            el.push(policy.to_element());
        }
        if let Some(context) = &self.requested_authn_context {
            el.push(context.to_element());
        }
        el
    }

    /// Serializes this request to XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

impl SignedElement for AuthnRequest {
    fn signed_source(&self) -> Option<(&Element, bool)> {
        self.source.as_ref().map(|el| (el, true))
    }
}

/// Requested authentication context carried by an AuthnRequest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedAuthnContext {
    /// Comparison method ("exact", "minimum", "maximum", "better").
    pub comparison: Option<String>,

    /// Acceptable authentication context class references.
    pub class_refs: Vec<String>,
}

impl RequestedAuthnContext {
    fn from_element(el: &Element) -> Self {
        Self {
            comparison: el.attr("Comparison").map(str::to_string),
            class_refs: el
                .children_named("AuthnContextClassRef")
                .map(|c| c.text())
                .collect(),
        }
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:RequestedAuthnContext");
        if let Some(comparison) = &self.comparison {
            el.set_attr("Comparison", comparison);
        }
        for class_ref in &self.class_refs {
            el.push(Element::new("saml:AuthnContextClassRef").with_text(class_ref.clone()));
        }
        el
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NameIdFormat, SamlBinding};

    #[test]
    fn roundtrip_preserves_semantic_fields() {
        let request = AuthnRequest::new("https://sp.example.com")
            .with_acs_url("https://sp.example.com/acs")
            .with_destination("https://idp.example.com/sso")
            .with_binding(SamlBinding::HttpPost)
            .with_name_id_policy(NameIdPolicy::with_format(NameIdFormat::Persistent));

        let parsed = AuthnRequest::parse(&request.to_xml()).unwrap();
        assert_eq!(parsed.id, request.id);
        assert_eq!(parsed.issuer, request.issuer);
        assert_eq!(
            parsed.issue_instant.timestamp(),
            request.issue_instant.timestamp()
        );
        assert_eq!(
            parsed.assertion_consumer_service_url,
            request.assertion_consumer_service_url
        );
        assert_eq!(parsed.parsed_binding(), Some(SamlBinding::HttpPost));
        assert_eq!(
            parsed.name_id_policy.as_ref().unwrap().parsed_format(),
            Some(NameIdFormat::Persistent)
        );
        assert!(!parsed.force_authn);
    }

    #[test]
    fn version_other_than_two_is_rejected() {
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1" Version="1.1" IssueInstant="2026-01-01T00:00:00Z"><saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">sp</saml:Issuer></samlp:AuthnRequest>"#;
        assert!(matches!(
            AuthnRequest::parse(xml),
            Err(SamlError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn missing_issuer_is_rejected() {
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z"/>"#;
        assert!(matches!(
            AuthnRequest::parse(xml),
            Err(SamlError::MissingElement(_))
        ));
    }

    #[test]
    fn duplicate_name_id_policy_is_rejected() {
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z"><saml:Issuer>sp</saml:Issuer><samlp:NameIDPolicy/><samlp:NameIDPolicy/></samlp:AuthnRequest>"#;
        assert!(matches!(
            AuthnRequest::parse(xml),
            Err(SamlError::DuplicateElement(_))
        ));
    }

    #[test]
    fn unknown_children_are_ignored() {
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z" ForceAuthn="true"><saml:Issuer>sp</saml:Issuer><samlp:Extensions><foo/></samlp:Extensions></samlp:AuthnRequest>"#;
        let parsed = AuthnRequest::parse(xml).unwrap();
        assert!(parsed.force_authn);
        assert!(!parsed.has_signature());
    }
}
