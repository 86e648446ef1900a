//! SAML 2.0 protocol engine for the FedPoint identity provider.
//!
//! This crate builds, signs, encrypts, transmits, receives, decrypts and
//! verifies the XML messages exchanged between an identity provider and
//! its service providers during single sign-on and single logout:
//!
//! - **Message/assertion model** - AuthnRequest, Assertion,
//!   (Encrypted)Assertion, LogoutRequest/Response, parsed fail-closed
//!   from and serialized to XML
//! - **XML signature** - enveloped signature creation and validation
//! - **XML encryption** - assertion and NameID encryption around an
//!   OAEP/CBC key-wrapping protocol
//! - **Bindings** - HTTP-POST, HTTP-Redirect, HTTP-Artifact and SOAP
//! - **IdP orchestration** - endpoint selection, assertion construction
//!   policy and logout fan-out
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`types`] - core SAML types and data structures
//! - [`xml`] - the owned XML tree and per-document query context
//! - [`signature`] - XML signature signing and validation
//! - [`encryption`] - XML encryption and decryption
//! - [`bindings`] - transport encodings and the SOAP back channel
//! - [`idp`] - IdP-side orchestration and provider traits
//! - [`error`] - error types for SAML operations
//!
//! Processing is single-request and synchronous: one inbound message is
//! validated and answered within its request cycle, and cryptographic or
//! structural validation failures are terminal, never retried.
//!
//! # SAML Specifications
//!
//! This implementation follows these specifications:
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [SAML 2.0 Profiles](https://docs.oasis-open.org/security/saml/v2.0/saml-profiles-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)
//! - [XML Encryption](https://www.w3.org/TR/xmlenc-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod encryption;
pub mod error;
pub mod idp;
pub mod signature;
pub mod types;
pub mod xml;

pub use error::{ErrorKind, SamlError, SamlResult};
pub use types::*;
