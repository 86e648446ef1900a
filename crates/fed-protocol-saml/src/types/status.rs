//! SAML Status types.

use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::{status_codes, sub_status_codes};
use crate::xml::Element;

/// SAML protocol status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status code (possibly nested).
    pub status_code: StatusCode,

    /// Optional human-readable status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::success(),
            status_message: None,
        }
    }

    /// Creates a requester error status.
    #[must_use]
    pub fn requester_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::requester(),
            status_message: Some(message.into()),
        }
    }

    /// Creates a responder error status.
    #[must_use]
    pub fn responder_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::responder(),
            status_message: Some(message.into()),
        }
    }

    /// Success with the partial-logout second-level code.
    #[must_use]
    pub fn partial_logout() -> Self {
        Self {
            status_code: StatusCode::success()
                .with_sub_status(StatusCode::new(sub_status_codes::PARTIAL_LOGOUT)),
            status_message: Some("Some sessions could not be terminated".to_string()),
        }
    }

    /// Builds the status that reports a terminal error to the requester.
    #[must_use]
    pub fn from_error(err: &SamlError) -> Self {
        let mut code = StatusCode::new(err.response_status_code());
        if let Some(sub) = err.sub_status_code() {
            code = code.with_sub_status(StatusCode::new(sub));
        }
        Self {
            status_code: code,
            status_message: Some(err.to_string()),
        }
    }

    /// Returns true if the top-level code is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// Sets the status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Builds a status from its XML element.
    pub fn from_element(el: &Element) -> SamlResult<Self> {
        let code_el = el.required_child("StatusCode")?;
        let status_code = StatusCode::from_element(code_el)?;
        let status_message = el
            .optional_child("StatusMessage")?
            .map(|m| m.text())
            .filter(|m| !m.is_empty());
        Ok(Self {
            status_code,
            status_message,
        })
    }

    /// Serializes this status.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:Status");
        el.push(self.status_code.to_element());
        if let Some(message) = &self.status_message {
            el.push(Element::new("samlp:StatusMessage").with_text(message.clone()));
        }
        el
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

/// SAML status code, optionally nested one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// The status code URI.
    pub value: String,

    /// Optional nested second-level code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<Box<StatusCode>>,
}

impl StatusCode {
    /// Creates a new status code with the given value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status_code: None,
        }
    }

    /// Creates a success status code.
    #[must_use]
    pub fn success() -> Self {
        Self::new(status_codes::SUCCESS)
    }

    /// Creates a requester error status code.
    #[must_use]
    pub fn requester() -> Self {
        Self::new(status_codes::REQUESTER)
    }

    /// Creates a responder error status code.
    #[must_use]
    pub fn responder() -> Self {
        Self::new(status_codes::RESPONDER)
    }

    /// Adds a second-level status code.
    #[must_use]
    pub fn with_sub_status(mut self, sub: StatusCode) -> Self {
        self.status_code = Some(Box::new(sub));
        self
    }

    /// Returns true if this is the Success code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.value == status_codes::SUCCESS
    }

    /// Returns the second-level code value if present.
    #[must_use]
    pub fn sub_status_value(&self) -> Option<&str> {
        self.status_code.as_ref().map(|s| s.value.as_str())
    }

    fn from_element(el: &Element) -> SamlResult<Self> {
        let value = el
            .attr("Value")
            .ok_or_else(|| SamlError::MissingElement("StatusCode Value".to_string()))?
            .to_string();
        let sub = el
            .optional_child("StatusCode")?
            .map(Self::from_element)
            .transpose()?;
        Ok(Self {
            value,
            status_code: sub.map(Box::new),
        })
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("samlp:StatusCode").with_attr("Value", self.value.clone());
        if let Some(sub) = &self.status_code {
            el.push(sub.to_element());
        }
        el
    }
}
