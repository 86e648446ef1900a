//! SAML Name ID types.
//!
//! Name identifiers represent the authenticated subject. A subject
//! reference is either a plain NameID or an opaque encrypted blob; the two
//! are modeled as a tagged variant so that reading the plain value while
//! only the encrypted form is populated is a checked error instead of a
//! null dereference.

use serde::{Deserialize, Serialize};

use crate::encryption::EncryptedElement;
use crate::error::{SamlError, SamlResult};
use crate::types::NameIdFormat;
use crate::xml::Element;

/// SAML Name ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The identifier value.
    pub value: String,

    /// The format URI of the identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The security or administrative domain that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,

    /// The service provider's entity ID that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,

    /// An alternative identifier provided by the SP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_provided_id: Option<String>,
}

impl NameId {
    /// Creates a new name ID with the given value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
            sp_provided_id: None,
        }
    }

    /// Creates a transient name ID.
    #[must_use]
    pub fn transient(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Transient)
    }

    /// Creates a persistent name ID.
    #[must_use]
    pub fn persistent(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Persistent)
    }

    /// Creates an email name ID.
    #[must_use]
    pub fn email(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Email)
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: NameIdFormat) -> Self {
        self.format = Some(format.uri().to_string());
        self
    }

    /// Sets the SP name qualifier.
    #[must_use]
    pub fn with_sp_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.sp_name_qualifier = Some(qualifier.into());
        self
    }

    /// Returns the parsed format, defaulting to unspecified.
    #[must_use]
    pub fn parsed_format(&self) -> NameIdFormat {
        self.format
            .as_deref()
            .and_then(NameIdFormat::from_uri)
            .unwrap_or_default()
    }

    /// Builds a NameID from its XML element.
    pub fn from_element(el: &Element) -> SamlResult<Self> {
        let value = el.text();
        if value.is_empty() {
            return Err(SamlError::MissingElement("NameID value".to_string()));
        }
        Ok(Self {
            value,
            format: el.attr("Format").map(str::to_string),
            name_qualifier: el.attr("NameQualifier").map(str::to_string),
            sp_name_qualifier: el.attr("SPNameQualifier").map(str::to_string),
            sp_provided_id: el.attr("SPProvidedID").map(str::to_string),
        })
    }

    /// Serializes this NameID under the given qualified element name.
    #[must_use]
    pub fn to_element(&self, qname: &str) -> Element {
        let mut el = Element::new(qname);
        if let Some(format) = &self.format {
            el.set_attr("Format", format);
        }
        if let Some(q) = &self.name_qualifier {
            el.set_attr("NameQualifier", q);
        }
        if let Some(q) = &self.sp_name_qualifier {
            el.set_attr("SPNameQualifier", q);
        }
        if let Some(id) = &self.sp_provided_id {
            el.set_attr("SPProvidedID", id);
        }
        el.push_text(self.value.clone());
        el
    }
}

/// A subject identifier: plain, or encrypted and not yet decrypted.
#[derive(Debug, Clone)]
pub enum SubjectId {
    /// A plain name identifier.
    Plain(NameId),
    /// An encrypted identifier; [`SubjectId::name_id`] fails until the
    /// encryption subsystem has replaced it with the plain form.
    Encrypted(EncryptedElement),
}

impl SubjectId {
    /// Returns the plain name identifier.
    ///
    /// # Errors
    ///
    /// Fails with [`SamlError::NameIdEncrypted`] while only the encrypted
    /// form is populated.
    pub fn name_id(&self) -> SamlResult<&NameId> {
        match self {
            Self::Plain(name_id) => Ok(name_id),
            Self::Encrypted(_) => Err(SamlError::NameIdEncrypted),
        }
    }

    /// Returns the encrypted form, if that is what is populated.
    #[must_use]
    pub fn encrypted(&self) -> Option<&EncryptedElement> {
        match self {
            Self::Plain(_) => None,
            Self::Encrypted(enc) => Some(enc),
        }
    }

    /// True if the plain form is populated.
    #[must_use]
    pub const fn is_plain(&self) -> bool {
        matches!(self, Self::Plain(_))
    }
}

/// Name ID policy carried by an AuthnRequest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIdPolicy {
    /// The requested name ID format URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The SP name qualifier for the name ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,

    /// Whether a new identifier may be created for this request.
    #[serde(default)]
    pub allow_create: bool,
}

impl NameIdPolicy {
    /// Creates a policy requesting a specific format.
    #[must_use]
    pub fn with_format(format: NameIdFormat) -> Self {
        Self {
            format: Some(format.uri().to_string()),
            sp_name_qualifier: None,
            allow_create: false,
        }
    }

    /// Returns the parsed format, if the URI is recognized.
    #[must_use]
    pub fn parsed_format(&self) -> Option<NameIdFormat> {
        self.format.as_deref().and_then(NameIdFormat::from_uri)
    }

    /// Builds a policy from its XML element.
    #[must_use]
    pub fn from_element(el: &Element) -> Self {
        Self {
            format: el.attr("Format").map(str::to_string),
            sp_name_qualifier: el.attr("SPNameQualifier").map(str::to_string),
            allow_create: el.attr("AllowCreate") == Some("true"),
        }
    }

    /// Serializes this policy.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:NameIDPolicy");
        if let Some(format) = &self.format {
            el.set_attr("Format", format);
        }
        if let Some(q) = &self.sp_name_qualifier {
            el.set_attr("SPNameQualifier", q);
        }
        if self.allow_create {
            el.set_attr("AllowCreate", "true");
        }
        el
    }
}
