//! SAML binding transport layer.
//!
//! Moves serialized messages between parties over HTTP-POST,
//! HTTP-Redirect, HTTP-Artifact and SOAP. Each binding turns an outbound
//! message into a [`TransportAction`] for the HTTP layer to perform, and
//! turns an inbound payload back into XML plus its relay state.

mod artifact;
mod post;
mod redirect;
mod soap;

pub use artifact::{Artifact, ArtifactStore, HttpArtifactBinding, InMemoryArtifactStore};
pub use post::HttpPostBinding;
pub use redirect::HttpRedirectBinding;
pub use soap::{resolve_artifact, ClientIdentity, SoapClient, SoapEnvelope};

/// SAML message type for binding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// A request message (`SAMLRequest` parameter).
    Request,
    /// A response message (`SAMLResponse` parameter).
    Response,
}

impl SamlMessageType {
    /// Returns the form/query parameter name for this message type.
    #[must_use]
    pub const fn param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// What the HTTP layer should do to deliver an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// Render a self-submitting HTML form (HTTP-POST binding).
    PostForm {
        /// The complete HTML page.
        html: String,
    },
    /// Redirect the user agent (HTTP-Redirect and HTTP-Artifact bindings).
    Redirect {
        /// The redirect target, query parameters included.
        url: String,
    },
    /// Answer the current SOAP request with this envelope body.
    SoapEnvelope {
        /// The complete SOAP envelope.
        xml: String,
    },
}

/// A message decoded from an inbound transport payload.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// The decoded XML message.
    pub xml: String,
    /// The message type (request or response).
    pub message_type: SamlMessageType,
    /// The relay state, reattached from the transport payload.
    pub relay_state: Option<String>,
    /// The detached signature (HTTP-Redirect binding only).
    pub signature: Option<String>,
    /// The detached signature algorithm (HTTP-Redirect binding only).
    pub sig_alg: Option<String>,
}
