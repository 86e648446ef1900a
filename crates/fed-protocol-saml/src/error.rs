//! SAML error types.
//!
//! One flat error enum, grouped into four terminal classes: parse errors
//! (malformed or schema-violating XML), validation errors (cryptographic
//! or structural signature/encryption problems), policy errors (a valid
//! message the configuration refuses to serve), and transport errors
//! (back-channel failures). None of these are retried: re-processing a
//! forged or malformed message changes nothing.

use thiserror::Error;

use crate::types::{status_codes, sub_status_codes};

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// Terminal error classes; see [`SamlError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or schema-violating input.
    Parse,
    /// A signature or encrypted element that is present but unverifiable.
    Validation,
    /// A well-formed message the configuration refuses to serve.
    Policy,
    /// Back-channel (SOAP, artifact store) failure.
    Transport,
    /// Everything else.
    Internal,
}

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// XML could not be parsed at all.
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// A required element or attribute is absent.
    #[error("missing required element: {0}")]
    MissingElement(String),

    /// A should-be-singleton child occurred more than once.
    #[error("duplicate element: {0}")]
    DuplicateElement(String),

    /// A Conditions child that is neither an audience restriction nor a
    /// recognized no-op condition.
    #[error("unknown condition: {0}")]
    UnknownCondition(String),

    /// An inbound subject confirmation that is not the Bearer method.
    #[error("unsupported subject confirmation method: {0}")]
    UnsupportedConfirmationMethod(String),

    /// The message does not declare SAML version 2.0.
    #[error("unsupported SAML version: {0}")]
    UnsupportedVersion(String),

    /// Invalid request format or content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64Decode(String),

    /// DEFLATE (de)compression error.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// A signature is present but structurally or cryptographically invalid.
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    /// Signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureCreation(String),

    /// The caller-supplied key does not match the algorithm declared in the
    /// message.
    #[error("algorithm mismatch: message declares {declared}, key is {supplied}")]
    AlgorithmMismatch {
        /// Algorithm URI declared in the message.
        declared: String,
        /// Algorithm URI of the caller-supplied key.
        supplied: String,
    },

    /// Plain NameID access while only the encrypted form is populated.
    #[error("name identifier is encrypted and has not been decrypted")]
    NameIdEncrypted,

    /// Decryption produced no usable element.
    #[error("missing decrypted content")]
    MissingDecryptedContent,

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// No assertion consumer service endpoint satisfies the request.
    #[error("no usable ACS endpoint: {0}")]
    NoUsableEndpoint(String),

    /// A key of an unsupported type was offered for encryption/decryption.
    #[error("unsupported encryption key type: {0}")]
    UnsupportedKeyType(String),

    /// Holder-of-Key was requested without a mutual-TLS client certificate.
    #[error("cannot build Holder-of-Key assertion without a TLS client certificate")]
    MissingClientCertificate,

    /// An attribute encoding outside {string, base64, raw}.
    #[error("unsupported attribute encoding: {0}")]
    UnsupportedAttributeEncoding(String),

    /// Unknown or unsupported binding.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// The operation is not available on this binding.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The SOAP peer answered with a fault.
    #[error("SOAP fault: {0}")]
    SoapFault(String),

    /// The SOAP call itself failed.
    #[error("SOAP transport error: {0}")]
    SoapTransport(String),

    /// The artifact store could not be reached or refused the operation.
    #[error("artifact store error: {0}")]
    ArtifactStore(String),

    /// The metadata provider failed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A suspended flow could not be restored under the expected stage tag.
    #[error("flow state error: {0}")]
    FlowState(String),

    /// Cryptographic operation error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SamlError {
    /// Returns the terminal class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::XmlParse(_)
            | Self::MissingElement(_)
            | Self::DuplicateElement(_)
            | Self::UnknownCondition(_)
            | Self::UnsupportedConfirmationMethod(_)
            | Self::UnsupportedVersion(_)
            | Self::InvalidRequest(_)
            | Self::Base64Decode(_)
            | Self::Deflate(_) => ErrorKind::Parse,
            Self::SignatureInvalid(_)
            | Self::AlgorithmMismatch { .. }
            | Self::NameIdEncrypted
            | Self::MissingDecryptedContent
            | Self::DecryptionFailed(_) => ErrorKind::Validation,
            Self::NoUsableEndpoint(_)
            | Self::UnsupportedKeyType(_)
            | Self::MissingClientCertificate
            | Self::UnsupportedAttributeEncoding(_)
            | Self::UnsupportedBinding(_)
            | Self::NotSupported(_) => ErrorKind::Policy,
            Self::SoapFault(_) | Self::SoapTransport(_) | Self::ArtifactStore(_) => {
                ErrorKind::Transport
            }
            Self::SignatureCreation(_)
            | Self::EncryptionFailed(_)
            | Self::Metadata(_)
            | Self::FlowState(_)
            | Self::Crypto(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the top-level SAML status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Parse | ErrorKind::Validation => status_codes::REQUESTER,
            ErrorKind::Policy => match self {
                Self::UnsupportedBinding(_) | Self::NotSupported(_) => status_codes::REQUESTER,
                _ => status_codes::RESPONDER,
            },
            ErrorKind::Transport | ErrorKind::Internal => status_codes::RESPONDER,
        }
    }

    /// Returns a second-level status code where one applies.
    #[must_use]
    pub const fn sub_status_code(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedBinding(_) => Some(sub_status_codes::UNSUPPORTED_BINDING),
            Self::NoUsableEndpoint(_) => Some(sub_status_codes::REQUEST_DENIED),
            Self::NotSupported(_) => Some(sub_status_codes::REQUEST_UNSUPPORTED),
            _ => None,
        }
    }

    /// Returns the HTTP status code for surfacing this error without a
    /// protocol response.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Parse => 400,
            ErrorKind::Validation => 401,
            ErrorKind::Policy => 403,
            ErrorKind::Transport => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// Version mismatch errors map to their own top-level code.
    #[must_use]
    pub fn response_status_code(&self) -> &'static str {
        if matches!(self, Self::UnsupportedVersion(_)) {
            status_codes::VERSION_MISMATCH
        } else {
            self.status_code()
        }
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64Decode(err.to_string())
    }
}

impl From<std::io::Error> for SamlError {
    fn from(err: std::io::Error) -> Self {
        Self::Deflate(err.to_string())
    }
}

impl From<fed_crypto::CryptoError> for SamlError {
    fn from(err: fed_crypto::CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}
