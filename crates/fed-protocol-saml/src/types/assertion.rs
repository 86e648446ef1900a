//! SAML Assertion.
//!
//! The assertion is the security-critical artifact: everything in here
//! parses fail-closed. Audience restrictions are folded by set
//! intersection (restrictions are ANDed), validity bounds asserted in two
//! places resolve to the tightest window, and only the Bearer
//! subject-confirmation method is accepted on the inbound path.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::encryption::EncryptedElement;
use crate::error::{SamlError, SamlResult};
use crate::signature::SignedElement;
use crate::types::{
    confirmation_methods, format_instant, new_message_id, parse_instant, require_attr,
    require_version, NameId, SubjectId, SAML_NS, XSI_NS, XS_NS,
};
use crate::xml::Element;

/// SAML Assertion.
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Unique identifier for this assertion.
    pub id: String,

    /// Timestamp when this assertion was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the identity provider that issued this assertion.
    pub issuer: String,

    /// The subject of this assertion.
    pub subject: Option<Subject>,

    /// Conditions constraining the assertion's validity.
    pub conditions: Option<Conditions>,

    /// Authentication statement describing how the subject authenticated.
    pub authn_statement: Option<AuthnStatement>,

    /// Attributes released about the subject, in document order.
    pub attributes: Vec<Attribute>,

    /// The attribute NameFormat, collapsed to `None` ("unspecified") the
    /// moment two attributes disagree.
    pub attribute_name_format: Option<String>,

    /// The element this assertion was parsed from, if any, and whether it
    /// was the document root.
    source: Option<(Element, bool)>,
}

impl Assertion {
    /// Creates a new assertion.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            subject: None,
            conditions: None,
            authn_statement: None,
            attributes: Vec::new(),
            attribute_name_format: None,
            source: None,
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Sets the authentication statement.
    #[must_use]
    pub fn with_authn_statement(mut self, statement: AuthnStatement) -> Self {
        self.authn_statement = Some(statement);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// The subject's plain NameID.
    ///
    /// # Errors
    ///
    /// Fails if the assertion carries no subject, or if only the encrypted
    /// identifier form is populated and decryption has not run.
    pub fn name_id(&self) -> SamlResult<&NameId> {
        self.subject
            .as_ref()
            .ok_or_else(|| SamlError::MissingElement("Subject".to_string()))?
            .subject_id
            .name_id()
    }

    /// The effective start of the validity window: the latest NotBefore
    /// asserted in Conditions or any SubjectConfirmationData.
    #[must_use]
    pub fn effective_not_before(&self) -> Option<DateTime<Utc>> {
        let mut bounds: Vec<DateTime<Utc>> = Vec::new();
        if let Some(t) = self.conditions.as_ref().and_then(|c| c.not_before) {
            bounds.push(t);
        }
        bounds.extend(self.confirmation_bounds(|d| d.not_before));
        bounds.into_iter().max()
    }

    /// The effective end of the validity window: the earliest NotOnOrAfter
    /// asserted in Conditions or any SubjectConfirmationData.
    #[must_use]
    pub fn effective_not_on_or_after(&self) -> Option<DateTime<Utc>> {
        let mut bounds: Vec<DateTime<Utc>> = Vec::new();
        if let Some(t) = self.conditions.as_ref().and_then(|c| c.not_on_or_after) {
            bounds.push(t);
        }
        bounds.extend(self.confirmation_bounds(|d| d.not_on_or_after));
        bounds.into_iter().min()
    }

    fn confirmation_bounds<F>(&self, pick: F) -> Vec<DateTime<Utc>>
    where
        F: Fn(&SubjectConfirmationData) -> Option<DateTime<Utc>>,
    {
        self.subject
            .iter()
            .flat_map(|s| &s.confirmations)
            .filter_map(|c| c.data.as_ref())
            .filter_map(pick)
            .collect()
    }

    /// Parses an assertion document (the assertion as document root).
    pub fn parse(xml: &str) -> SamlResult<Self> {
        Self::from_element(Element::parse(xml)?, true)
    }

    pub(crate) fn from_element(el: Element, is_document_root: bool) -> SamlResult<Self> {
        if el.local_name() != "Assertion" {
            return Err(SamlError::XmlParse(format!(
                "expected Assertion, got {}",
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

        let subject = el
            .optional_child("Subject")?
            .map(Subject::from_element)
            .transpose()?;
        let conditions = el
            .optional_child("Conditions")?
            .map(Conditions::from_element)
            .transpose()?;
        let authn_statement = el
            .optional_child("AuthnStatement")?
            .map(AuthnStatement::from_element)
            .transpose()?;

        let mut attributes = Vec::new();
        let mut attribute_name_format: Option<String> = None;
        let mut format_seen = false;
        if let Some(statement) = el.optional_child("AttributeStatement")? {
            for attr_el in statement.children_named("Attribute") {
                let attribute = Attribute::from_element(attr_el)?;
                let this_format = attr_el.attr("NameFormat").map(str::to_string);
                if format_seen {
                    // Two attributes disagreeing on NameFormat collapses the
                    // assertion-level format to unspecified.
                    if attribute_name_format != this_format {
                        attribute_name_format = None;
                    }
                } else {
                    attribute_name_format = this_format;
                    format_seen = true;
                }
                attributes.push(attribute);
            }
        }

        Ok(Self {
            id,
            issue_instant,
            issuer,
            subject,
            conditions,
            authn_statement,
            attributes,
            attribute_name_format,
            source: Some((el, is_document_root)),
        })
    }

    /// Serializes this assertion to an element tree.
    ///
    /// The assertion root declares the saml and xsi prefixes itself so the
    /// subtree stays self-contained when it is detached for signing or
    /// encryption.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("saml:Assertion")
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("xmlns:xsi", XSI_NS)
            .with_attr("xmlns:xs", XS_NS);
        el.set_attr("ID", self.id.clone());
        el.set_attr("Version", "2.0");
        el.set_attr("IssueInstant", format_instant(self.issue_instant));

        el.push(Element::new("saml:Issuer").with_text(self.issuer.clone()));
        if let Some(subject) = &self.subject {
            el.push(subject.to_element());
        }
        if let Some(conditions) = &self.conditions {
            el.push(conditions.to_element());
        }
        if let Some(statement) = &self.authn_statement {
            el.push(statement.to_element());
        }
        if !self.attributes.is_empty() {
            let mut statement = Element::new("saml:AttributeStatement");
            for attribute in &self.attributes {
                statement.push(attribute.to_element(self.attribute_name_format.as_deref()));
            }
            el.push(statement);
        }
        el
    }

    /// Serializes this assertion to XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

impl SignedElement for Assertion {
    fn signed_source(&self) -> Option<(&Element, bool)> {
        self.source.as_ref().map(|(el, root)| (el, *root))
    }
}

/// Subject of an assertion.
#[derive(Debug, Clone)]
pub struct Subject {
    /// The subject identifier, plain or encrypted.
    pub subject_id: SubjectId,

    /// Subject confirmations.
    pub confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    /// Creates a subject with a plain name identifier.
    #[must_use]
    pub fn new(name_id: NameId) -> Self {
        Self {
            subject_id: SubjectId::Plain(name_id),
            confirmations: Vec::new(),
        }
    }

    /// Creates a subject with an encrypted identifier.
    #[must_use]
    pub fn encrypted(encrypted: EncryptedElement) -> Self {
        Self {
            subject_id: SubjectId::Encrypted(encrypted),
            confirmations: Vec::new(),
        }
    }

    /// Adds a subject confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.confirmations.push(confirmation);
        self
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
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
            (None, None) => {
                return Err(SamlError::MissingElement("Subject NameID".to_string()));
            }
        };

        let mut confirmations = Vec::new();
        for confirmation in el.children_named("SubjectConfirmation") {
            confirmations.push(SubjectConfirmation::from_element(confirmation)?);
        }

        Ok(Self {
            subject_id,
            confirmations,
        })
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("saml:Subject");
        match &self.subject_id {
            SubjectId::Plain(name_id) => el.push(name_id.to_element("saml:NameID")),
            SubjectId::Encrypted(enc) => el.push(enc.to_wrapper("saml:EncryptedID")),
        }
        for confirmation in &self.confirmations {
            el.push(confirmation.to_element());
        }
        el
    }
}

/// Subject confirmation.
#[derive(Debug, Clone)]
pub struct SubjectConfirmation {
    /// The confirmation method URI.
    pub method: String,

    /// Additional confirmation data.
    pub data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    /// Creates a bearer confirmation.
    #[must_use]
    pub fn bearer() -> Self {
        Self {
            method: confirmation_methods::BEARER.to_string(),
            data: None,
        }
    }

    /// Creates a Holder-of-Key confirmation carrying the confirming
    /// certificate (base64 DER).
    #[must_use]
    pub fn holder_of_key(certificate_b64: impl Into<String>) -> Self {
        Self {
            method: confirmation_methods::HOLDER_OF_KEY.to_string(),
            data: Some(SubjectConfirmationData {
                holder_certificate: Some(certificate_b64.into()),
                ..SubjectConfirmationData::default()
            }),
        }
    }

    /// Sets the confirmation data.
    #[must_use]
    pub fn with_data(mut self, data: SubjectConfirmationData) -> Self {
        self.data = Some(data);
        self
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
        let method = require_attr(el, "Method")?;
        // The outbound builder can emit Holder-of-Key, but inbound parsing
        // accepts Bearer only; anything else fails closed.
        if method != confirmation_methods::BEARER {
            return Err(SamlError::UnsupportedConfirmationMethod(method));
        }
        let data = el
            .optional_child("SubjectConfirmationData")?
            .map(SubjectConfirmationData::from_element)
            .transpose()?;
        Ok(Self { method, data })
    }

    fn to_element(&self) -> Element {
        let mut el =
            Element::new("saml:SubjectConfirmation").with_attr("Method", self.method.clone());
        if let Some(data) = &self.data {
            el.push(data.to_element());
        }
        el
    }
}

/// Subject confirmation data.
#[derive(Debug, Clone, Default)]
pub struct SubjectConfirmationData {
    /// The request ID this assertion answers.
    pub in_response_to: Option<String>,

    /// The location the assertion may be presented to.
    pub recipient: Option<String>,

    /// Start of the confirmation window.
    pub not_before: Option<DateTime<Utc>>,

    /// End of the confirmation window.
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Client address constraint.
    pub address: Option<String>,

    /// Confirming certificate (base64 DER) for Holder-of-Key.
    pub holder_certificate: Option<String>,
}

impl SubjectConfirmationData {
    /// Creates confirmation data answering a request at a recipient URL.
    #[must_use]
    pub fn for_request(
        request_id: impl Into<String>,
        recipient: impl Into<String>,
        not_on_or_after: DateTime<Utc>,
    ) -> Self {
        Self {
            in_response_to: Some(request_id.into()),
            recipient: Some(recipient.into()),
            not_before: None,
            not_on_or_after: Some(not_on_or_after),
            address: None,
            holder_certificate: None,
        }
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
        let not_before = el.attr("NotBefore").map(parse_instant).transpose()?;
        let not_on_or_after = el.attr("NotOnOrAfter").map(parse_instant).transpose()?;
        Ok(Self {
            in_response_to: el.attr("InResponseTo").map(str::to_string),
            recipient: el.attr("Recipient").map(str::to_string),
            not_before,
            not_on_or_after,
            address: el.attr("Address").map(str::to_string),
            holder_certificate: None,
        })
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("saml:SubjectConfirmationData");
        if let Some(v) = &self.in_response_to {
            el.set_attr("InResponseTo", v);
        }
        if let Some(v) = &self.recipient {
            el.set_attr("Recipient", v);
        }
        if let Some(t) = self.not_before {
            el.set_attr("NotBefore", format_instant(t));
        }
        if let Some(t) = self.not_on_or_after {
            el.set_attr("NotOnOrAfter", format_instant(t));
        }
        if let Some(v) = &self.address {
            el.set_attr("Address", v);
        }
        if let Some(cert) = &self.holder_certificate {
            el.push(
                Element::new("ds:KeyInfo")
                    .with_attr("xmlns:ds", crate::types::XMLDSIG_NS)
                    .with_child(
                        Element::new("ds:X509Data").with_child(
                            Element::new("ds:X509Certificate").with_text(cert.clone()),
                        ),
                    ),
            );
        }
        el
    }
}

/// Conditions constraining an assertion's validity.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    /// Time before which the assertion is not valid.
    pub not_before: Option<DateTime<Utc>>,

    /// Time at or after which the assertion is not valid.
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// The set of valid audiences; `None` means unrestricted.
    pub audiences: Option<BTreeSet<String>>,
}

impl Conditions {
    /// Creates conditions with the given validity window.
    #[must_use]
    pub fn with_window(not_before: DateTime<Utc>, not_on_or_after: DateTime<Utc>) -> Self {
        Self {
            not_before: Some(not_before),
            not_on_or_after: Some(not_on_or_after),
            audiences: None,
        }
    }

    /// Restricts the audience set to the given audiences.
    #[must_use]
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = Some(audiences.into_iter().map(Into::into).collect());
        self
    }

    /// True if the given audience is acceptable.
    #[must_use]
    pub fn permits_audience(&self, audience: &str) -> bool {
        match &self.audiences {
            None => true,
            Some(set) => set.contains(audience),
        }
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
        let not_before = el.attr("NotBefore").map(parse_instant).transpose()?;
        let not_on_or_after = el.attr("NotOnOrAfter").map(parse_instant).transpose()?;

        // Restrictions are ANDed: each AudienceRestriction narrows the
        // allowed set by intersection.
        let mut audiences: Option<BTreeSet<String>> = None;
        for child in el.child_elements() {
            match child.local_name() {
                "AudienceRestriction" => {
                    let this: BTreeSet<String> = child
                        .children_named("Audience")
                        .map(|a| a.text())
                        .filter(|a| !a.is_empty())
                        .collect();
                    audiences = Some(match audiences {
                        None => this,
                        Some(prev) => prev.intersection(&this).cloned().collect(),
                    });
                }
                // Recognized, carrying no constraint this engine enforces.
                "OneTimeUse" | "ProxyRestriction" => {}
                other => {
                    return Err(SamlError::UnknownCondition(other.to_string()));
                }
            }
        }

        Ok(Self {
            not_before,
            not_on_or_after,
            audiences,
        })
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("saml:Conditions");
        if let Some(t) = self.not_before {
            el.set_attr("NotBefore", format_instant(t));
        }
        if let Some(t) = self.not_on_or_after {
            el.set_attr("NotOnOrAfter", format_instant(t));
        }
        if let Some(audiences) = &self.audiences {
            let mut restriction = Element::new("saml:AudienceRestriction");
            for audience in audiences {
                restriction.push(Element::new("saml:Audience").with_text(audience.clone()));
            }
            el.push(restriction);
        }
        el
    }
}

/// Authentication statement.
#[derive(Debug, Clone)]
pub struct AuthnStatement {
    /// The time of authentication.
    pub authn_instant: DateTime<Utc>,

    /// The session index.
    pub session_index: Option<String>,

    /// Time at which the session ends.
    pub session_not_on_or_after: Option<DateTime<Utc>>,

    /// The authentication context class reference.
    pub context_class_ref: Option<String>,
}

impl AuthnStatement {
    /// Creates an authentication statement.
    #[must_use]
    pub fn new(authn_instant: DateTime<Utc>, context_class_ref: impl Into<String>) -> Self {
        Self {
            authn_instant,
            session_index: Some(format!("_session{}", uuid::Uuid::new_v4())),
            session_not_on_or_after: None,
            context_class_ref: Some(context_class_ref.into()),
        }
    }

    /// Sets the session end time.
    #[must_use]
    pub fn with_session_not_on_or_after(mut self, t: DateTime<Utc>) -> Self {
        self.session_not_on_or_after = Some(t);
        self
    }

    /// Sets the session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_index = Some(index.into());
        self
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
        let authn_instant = parse_instant(&require_attr(el, "AuthnInstant")?)?;
        let session_not_on_or_after = el
            .attr("SessionNotOnOrAfter")
            .map(parse_instant)
            .transpose()?;
        let context_class_ref = el
            .optional_child("AuthnContext")?
            .map(|ctx| ctx.optional_child("AuthnContextClassRef"))
            .transpose()?
            .flatten()
            .map(|r| r.text());
        Ok(Self {
            authn_instant,
            session_index: el.attr("SessionIndex").map(str::to_string),
            session_not_on_or_after,
            context_class_ref,
        })
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("saml:AuthnStatement")
            .with_attr("AuthnInstant", format_instant(self.authn_instant));
        if let Some(index) = &self.session_index {
            el.set_attr("SessionIndex", index);
        }
        if let Some(t) = self.session_not_on_or_after {
            el.set_attr("SessionNotOnOrAfter", format_instant(t));
        }
        let mut context = Element::new("saml:AuthnContext");
        if let Some(class_ref) = &self.context_class_ref {
            context.push(Element::new("saml:AuthnContextClassRef").with_text(class_ref.clone()));
        }
        el.push(context);
        el
    }
}

/// A single attribute value: character data or a raw XML fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Character data.
    Text(String),
    /// A raw XML fragment embedded as-is.
    Fragment(Element),
}

impl AttributeValue {
    /// The value as text; fragments render to their XML form.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Fragment(el) => el.to_xml(),
        }
    }
}

/// SAML Attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// The attribute name.
    pub name: String,

    /// The attribute values, order preserved.
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    /// Creates an attribute with text values.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|v| AttributeValue::Text(v.into()))
                .collect(),
        }
    }

    /// The values as plain text, order preserved.
    #[must_use]
    pub fn text_values(&self) -> Vec<String> {
        self.values.iter().map(AttributeValue::as_text).collect()
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
        let name = require_attr(el, "Name")?;
        let values = el
            .children_named("AttributeValue")
            .map(|v| match v.child_elements().next() {
                Some(fragment) => AttributeValue::Fragment(fragment.clone()),
                None => AttributeValue::Text(v.text()),
            })
            .collect();
        Ok(Self { name, values })
    }

    fn to_element(&self, name_format: Option<&str>) -> Element {
        let mut el = Element::new("saml:Attribute").with_attr("Name", self.name.clone());
        if let Some(format) = name_format {
            el.set_attr("NameFormat", format);
        }
        for value in &self.values {
            let value_el = match value {
                AttributeValue::Text(t) => Element::new("saml:AttributeValue")
                    .with_attr("xsi:type", "xs:string")
                    .with_text(t.clone()),
                AttributeValue::Fragment(fragment) => {
                    Element::new("saml:AttributeValue").with_child(fragment.clone())
                }
            };
            el.push(value_el);
        }
        el
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_assertion() -> Assertion {
        let now = Utc::now();
        Assertion::new("https://idp.example.com")
            .with_subject(
                Subject::new(NameId::transient("_t1")).with_confirmation(
                    SubjectConfirmation::bearer().with_data(SubjectConfirmationData::for_request(
                        "_req1",
                        "https://sp.example.com/acs",
                        now + Duration::seconds(300),
                    )),
                ),
            )
            .with_conditions(
                Conditions::with_window(now - Duration::seconds(30), now + Duration::seconds(300))
                    .with_audiences(["https://sp.example.com"]),
            )
            .with_authn_statement(AuthnStatement::new(
                now,
                crate::types::AuthnContextClass::PasswordProtectedTransport.uri(),
            ))
            .with_attribute(Attribute::new("mail", ["user@example.com"]))
            .with_attribute(Attribute::new("groups", ["staff", "admin"]))
    }

    #[test]
    fn roundtrip_preserves_semantic_fields() {
        let assertion = base_assertion();
        let parsed = Assertion::parse(&assertion.to_xml()).unwrap();

        assert_eq!(parsed.id, assertion.id);
        assert_eq!(parsed.issuer, assertion.issuer);
        assert_eq!(parsed.name_id().unwrap().value, "_t1");
        assert!(parsed
            .conditions
            .as_ref()
            .unwrap()
            .permits_audience("https://sp.example.com"));
        assert_eq!(parsed.attributes.len(), 2);
        assert_eq!(
            parsed.attributes[1].text_values(),
            vec!["staff".to_string(), "admin".to_string()]
        );
        assert!(parsed
            .authn_statement
            .as_ref()
            .unwrap()
            .session_index
            .is_some());
    }

    #[test]
    fn audience_intersection_narrows() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Conditions>
<saml:AudienceRestriction><saml:Audience>A</saml:Audience><saml:Audience>B</saml:Audience></saml:AudienceRestriction>
<saml:AudienceRestriction><saml:Audience>B</saml:Audience><saml:Audience>C</saml:Audience></saml:AudienceRestriction>
</saml:Conditions>
</saml:Assertion>"#;
        let assertion = Assertion::parse(xml).unwrap();
        let audiences = assertion.conditions.unwrap().audiences.unwrap();
        assert_eq!(audiences, BTreeSet::from(["B".to_string()]));
    }

    #[test]
    fn unknown_condition_fails_closed() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Conditions><saml:DelegationRestriction/></saml:Conditions>
</saml:Assertion>"#;
        assert!(matches!(
            Assertion::parse(xml),
            Err(SamlError::UnknownCondition(_))
        ));
    }

    #[test]
    fn one_time_use_and_proxy_restriction_are_tolerated() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Conditions><saml:OneTimeUse/><saml:ProxyRestriction Count="1"/></saml:Conditions>
</saml:Assertion>"#;
        let assertion = Assertion::parse(xml).unwrap();
        assert!(assertion.conditions.unwrap().audiences.is_none());
    }

    #[test]
    fn tightest_bounds_win() {
        let t1 = parse_instant("2026-01-01T00:00:00Z").unwrap();
        let t2 = parse_instant("2026-01-01T00:01:00Z").unwrap();
        let t3 = parse_instant("2026-01-01T00:04:00Z").unwrap();
        let t4 = parse_instant("2026-01-01T00:05:00Z").unwrap();

        let xml = format!(
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Subject>
<saml:NameID>u</saml:NameID>
<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
<saml:SubjectConfirmationData NotBefore="{}" NotOnOrAfter="{}"/>
</saml:SubjectConfirmation>
</saml:Subject>
<saml:Conditions NotBefore="{}" NotOnOrAfter="{}"/>
</saml:Assertion>"#,
            format_instant(t2),
            format_instant(t3),
            format_instant(t1),
            format_instant(t4),
        );
        let assertion = Assertion::parse(&xml).unwrap();
        assert_eq!(assertion.effective_not_before(), Some(t2));
        assert_eq!(assertion.effective_not_on_or_after(), Some(t3));
    }

    #[test]
    fn non_bearer_confirmation_fails_closed() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Subject>
<saml:NameID>u</saml:NameID>
<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:holder-of-key"/>
</saml:Subject>
</saml:Assertion>"#;
        assert!(matches!(
            Assertion::parse(xml),
            Err(SamlError::UnsupportedConfirmationMethod(_))
        ));
    }

    #[test]
    fn duplicate_subject_fails_closed() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Subject><saml:NameID>u</saml:NameID></saml:Subject>
<saml:Subject><saml:NameID>v</saml:NameID></saml:Subject>
</saml:Assertion>"#;
        assert!(matches!(
            Assertion::parse(xml),
            Err(SamlError::DuplicateElement(_))
        ));
    }

    #[test]
    fn name_id_and_encrypted_id_are_mutually_exclusive() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Subject>
<saml:NameID>u</saml:NameID>
<saml:EncryptedID><xenc:EncryptedData xmlns:xenc="urn:x"/></saml:EncryptedID>
</saml:Subject>
</saml:Assertion>"#;
        assert!(Assertion::parse(xml).is_err());
    }

    #[test]
    fn encrypted_id_gates_name_id_access() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:Subject>
<saml:EncryptedID><xenc:EncryptedData xmlns:xenc="urn:x"/></saml:EncryptedID>
</saml:Subject>
</saml:Assertion>"#;
        let assertion = Assertion::parse(xml).unwrap();
        assert!(matches!(
            assertion.name_id(),
            Err(SamlError::NameIdEncrypted)
        ));
    }

    #[test]
    fn name_format_collapses_on_disagreement() {
        let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z">
<saml:Issuer>idp</saml:Issuer>
<saml:AttributeStatement>
<saml:Attribute Name="a" NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:uri"><saml:AttributeValue>1</saml:AttributeValue></saml:Attribute>
<saml:Attribute Name="b" NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:basic"><saml:AttributeValue>2</saml:AttributeValue></saml:Attribute>
</saml:AttributeStatement>
</saml:Assertion>"#;
        let assertion = Assertion::parse(xml).unwrap();
        assert_eq!(assertion.attribute_name_format, None);

        let xml_single = xml.replace(
            "urn:oasis:names:tc:SAML:2.0:attrname-format:basic",
            "urn:oasis:names:tc:SAML:2.0:attrname-format:uri",
        );
        let assertion = Assertion::parse(&xml_single).unwrap();
        assert_eq!(
            assertion.attribute_name_format.as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:attrname-format:uri")
        );
    }
}
