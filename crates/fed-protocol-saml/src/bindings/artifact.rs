//! HTTP-Artifact binding.
//!
//! The message body never crosses the front channel. `send` stores the
//! serialized message in a shared store keyed by a freshly generated
//! artifact and redirects the user agent with the artifact as a query
//! parameter; the peer resolves the artifact to the stored message
//! out-of-band over SOAP. Expiry of stored messages is a store-level
//! concern, not decided here.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{SamlError, SamlResult};
use crate::types::ARTIFACT_TYPE_CODE;

use super::{DecodedMessage, TransportAction};

/// A SAML type-4 artifact: a 4-byte type/endpoint-index header, the SHA-1
/// of the issuer entity ID, and a 20-byte random message handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    /// Two-byte artifact type code.
    pub type_code: [u8; 2],
    /// Index of the artifact resolution endpoint at the issuer.
    pub endpoint_index: u16,
    /// SHA-1 digest of the issuer entity ID.
    pub source_id: [u8; 20],
    /// Cryptographically random message handle.
    pub message_handle: [u8; 20],
}

impl Artifact {
    /// Generates a fresh artifact for the given issuer.
    #[must_use]
    pub fn generate(issuer: &str, endpoint_index: u16) -> Self {
        let digest = fed_crypto::sha1(issuer.as_bytes());
        let mut source_id = [0u8; 20];
        source_id.copy_from_slice(&digest);

        let random = fed_crypto::random_bytes(20);
        let mut message_handle = [0u8; 20];
        message_handle.copy_from_slice(&random);

        Self {
            type_code: ARTIFACT_TYPE_CODE,
            endpoint_index,
            source_id,
            message_handle,
        }
    }

    /// Encodes the artifact for the `SAMLart` parameter.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(44);
        bytes.extend_from_slice(&self.type_code);
        bytes.extend_from_slice(&self.endpoint_index.to_be_bytes());
        bytes.extend_from_slice(&self.source_id);
        bytes.extend_from_slice(&self.message_handle);
        BASE64.encode(bytes)
    }

    /// Decodes a `SAMLart` parameter value.
    pub fn decode(encoded: &str) -> SamlResult<Self> {
        let bytes = BASE64.decode(encoded)?;
        if bytes.len() != 44 {
            return Err(SamlError::InvalidRequest(format!(
                "artifact must be 44 bytes, got {}",
                bytes.len()
            )));
        }
        let mut type_code = [0u8; 2];
        type_code.copy_from_slice(&bytes[0..2]);
        let endpoint_index = u16::from_be_bytes([bytes[2], bytes[3]]);
        let mut source_id = [0u8; 20];
        source_id.copy_from_slice(&bytes[4..24]);
        let mut message_handle = [0u8; 20];
        message_handle.copy_from_slice(&bytes[24..44]);
        Ok(Self {
            type_code,
            endpoint_index,
            source_id,
            message_handle,
        })
    }
}

/// Shared store mapping artifacts to serialized messages.
///
/// Writes are assumed atomic per key; artifact keys carry 20 random bytes
/// so write collisions are cryptographically negligible.
pub trait ArtifactStore: Send + Sync {
    /// Stores a serialized message under an artifact.
    fn put(&self, artifact: &str, message: &str) -> SamlResult<()>;

    /// Removes and returns the message stored under an artifact.
    fn take(&self, artifact: &str) -> SamlResult<Option<String>>;
}

/// In-process artifact store.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, artifact: &str, message: &str) -> SamlResult<()> {
        self.entries
            .lock()
            .map_err(|_| SamlError::ArtifactStore("store lock poisoned".to_string()))?
            .insert(artifact.to_string(), message.to_string());
        Ok(())
    }

    fn take(&self, artifact: &str) -> SamlResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| SamlError::ArtifactStore("store lock poisoned".to_string()))?
            .remove(artifact))
    }
}

/// HTTP-Artifact binding.
pub struct HttpArtifactBinding;

impl HttpArtifactBinding {
    /// Stores the message and redirects the user agent with the artifact
    /// reference.
    pub fn send(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        issuer: &str,
        endpoint_index: u16,
        store: &dyn ArtifactStore,
    ) -> SamlResult<TransportAction> {
        let artifact = Artifact::generate(issuer, endpoint_index).encode();
        store.put(&artifact, xml)?;

        let separator = if destination.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}SAMLart={}",
            destination,
            separator,
            urlencoding::encode(&artifact)
        );
        if let Some(rs) = relay_state {
            url.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
        }

        tracing::debug!(destination, "artifact issued");
        Ok(TransportAction::Redirect { url })
    }

    /// Front-channel receive is not a supported operation on this binding;
    /// artifacts are resolved out-of-band over SOAP.
    pub fn receive() -> SamlResult<DecodedMessage> {
        Err(SamlError::NotSupported(
            "front-channel receive on the HTTP-Artifact binding".to_string(),
        ))
    }

    /// Resolves an artifact from the shared store (the IdP side of SOAP
    /// artifact resolution).
    pub fn resolve(artifact: &str, store: &dyn ArtifactStore) -> SamlResult<String> {
        store.take(artifact)?.ok_or_else(|| {
            SamlError::ArtifactStore(format!("no message stored for artifact {artifact}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_encode_decode_roundtrip() {
        let artifact = Artifact::generate("https://idp.example.com", 3);
        let decoded = Artifact::decode(&artifact.encode()).unwrap();
        assert_eq!(decoded, artifact);
        assert_eq!(decoded.type_code, ARTIFACT_TYPE_CODE);
        assert_eq!(decoded.endpoint_index, 3);
        assert_eq!(
            decoded.source_id.to_vec(),
            fed_crypto::sha1(b"https://idp.example.com")
        );
    }

    #[test]
    fn artifacts_for_same_issuer_are_distinct() {
        let a = Artifact::generate("https://idp.example.com", 0);
        let b = Artifact::generate("https://idp.example.com", 0);
        assert_eq!(a.source_id, b.source_id);
        assert_ne!(a.message_handle, b.message_handle);
    }

    #[test]
    fn send_stores_and_redirects() {
        let store = InMemoryArtifactStore::new();
        let TransportAction::Redirect { url } = HttpArtifactBinding::send(
            "<samlp:Response/>",
            "https://sp.example.com/acs",
            Some("rs"),
            "https://idp.example.com",
            0,
            &store,
        )
        .unwrap() else {
            panic!("artifact binding must redirect");
        };

        assert!(url.starts_with("https://sp.example.com/acs?SAMLart="));
        assert!(url.contains("&RelayState=rs"));

        // The stored message resolves exactly once.
        let artifact = url::Url::parse(&url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "SAMLart")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(
            HttpArtifactBinding::resolve(&artifact, &store).unwrap(),
            "<samlp:Response/>"
        );
        assert!(HttpArtifactBinding::resolve(&artifact, &store).is_err());
    }

    #[test]
    fn front_channel_receive_is_unsupported() {
        assert!(matches!(
            HttpArtifactBinding::receive(),
            Err(SamlError::NotSupported(_))
        ));
    }
}
