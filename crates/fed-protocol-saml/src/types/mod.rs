//! SAML 2.0 types and data structures.
//!
//! Typed representations of the protocol messages and the assertion,
//! parsed from and serialized to XML. Parsing is fail-closed: a missing
//! required child, a repeated singleton child, an unknown condition or an
//! unsupported subject-confirmation method all reject the document.

mod assertion;
mod authn_request;
mod constants;
mod logout;
mod name_id;
mod response;
mod status;

pub use assertion::*;
pub use authn_request::*;
pub use constants::*;
pub use logout::*;
pub use name_id::*;
pub use response::*;
pub use status::*;

use chrono::{DateTime, Utc};

use crate::error::{SamlError, SamlResult};
use crate::xml::Element;

/// Generates a fresh message/assertion identifier.
#[must_use]
pub fn new_message_id() -> String {
    format!("_id{}", uuid::Uuid::new_v4())
}

pub(crate) fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub(crate) fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SamlError::XmlParse(format!("invalid timestamp {value:?}: {e}")))
}

/// Version handling is strict: anything but "2.0" rejects the document.
pub(crate) fn require_version(el: &Element) -> SamlResult<()> {
    match el.attr("Version") {
        Some("2.0") => Ok(()),
        Some(other) => Err(SamlError::UnsupportedVersion(other.to_string())),
        None => Err(SamlError::MissingElement(format!(
            "{} Version",
            el.local_name()
        ))),
    }
}

pub(crate) fn require_attr(el: &Element, name: &str) -> SamlResult<String> {
    el.attr(name)
        .map(str::to_string)
        .ok_or_else(|| SamlError::MissingElement(format!("{} {name}", el.local_name())))
}

/// Declares the protocol, assertion, xsi and xs namespaces on a message
/// root so descendant elements can reference the prefixes without
/// re-declaring them.
pub(crate) fn declare_message_namespaces(el: &mut Element) {
    el.set_attr("xmlns:samlp", SAMLP_NS);
    el.set_attr("xmlns:saml", SAML_NS);
    el.set_attr("xmlns:xsi", XSI_NS);
    el.set_attr("xmlns:xs", XS_NS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
        assert!(new_message_id().starts_with("_id"));
    }

    #[test]
    fn version_enforcement() {
        let el = Element::parse(r#"<a Version="2.0"/>"#).unwrap();
        assert!(require_version(&el).is_ok());

        let el = Element::parse(r#"<a Version="1.1"/>"#).unwrap();
        assert!(matches!(
            require_version(&el),
            Err(SamlError::UnsupportedVersion(_))
        ));

        let el = Element::parse("<a/>").unwrap();
        assert!(matches!(
            require_version(&el),
            Err(SamlError::MissingElement(_))
        ));
    }

    #[test]
    fn instant_roundtrip() {
        let now = Utc::now();
        let parsed = parse_instant(&format_instant(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }
}
