//! External collaborators and per-entity configuration.
//!
//! The engine consumes metadata, session associations and suspended flow
//! state through traits; storage semantics belong to the implementations.
//! Per-SP feature flags override the IdP-wide defaults wherever both
//! exist.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::signature::SignatureConfig;
use crate::types::{NameId, SamlBinding};

/// A protocol endpoint declared in metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The endpoint URL.
    pub location: String,
    /// The binding served at this location.
    pub binding: SamlBinding,
    /// Where responses should go, when distinct from `location`.
    pub response_location: Option<String>,
    /// The endpoint index, if declared.
    pub index: Option<u16>,
    /// The `isDefault` flag exactly as declared: absent, true or false.
    pub is_default: Option<bool>,
}

impl Endpoint {
    /// Creates an endpoint with only a location and binding.
    #[must_use]
    pub fn new(location: impl Into<String>, binding: SamlBinding) -> Self {
        Self {
            location: location.into(),
            binding,
            response_location: None,
            index: None,
            is_default: None,
        }
    }

    /// Sets the declared default flag.
    #[must_use]
    pub const fn with_is_default(mut self, is_default: bool) -> Self {
        self.is_default = Some(is_default);
        self
    }

    /// Sets the endpoint index.
    #[must_use]
    pub const fn with_index(mut self, index: u16) -> Self {
        self.index = Some(index);
        self
    }

    /// The URL responses should be sent to.
    #[must_use]
    pub fn response_location(&self) -> &str {
        self.response_location.as_deref().unwrap_or(&self.location)
    }
}

/// How an attribute's values are encoded into AttributeValue elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeEncoding {
    /// Plain character data.
    #[default]
    String,
    /// Base64 of the value bytes.
    Base64,
    /// The value is an XML fragment embedded as-is.
    RawXml,
}

impl AttributeEncoding {
    /// Parses a configured encoding name.
    pub fn from_config(name: &str) -> SamlResult<Self> {
        match name {
            "string" => Ok(Self::String),
            "base64" => Ok(Self::Base64),
            "raw" => Ok(Self::RawXml),
            other => Err(SamlError::UnsupportedAttributeEncoding(other.to_string())),
        }
    }
}

/// IdP-wide configuration and defaults.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    /// The IdP entity ID (assertion issuer).
    pub entity_id: String,

    /// Signing key (PKCS#8 or PKCS#1 DER).
    pub signing_key_der: Vec<u8>,

    /// Certificate chain embedded in signatures, leaf first.
    pub certificate_chain_der: Vec<Vec<u8>>,

    /// Outbound signature configuration.
    pub signature_config: SignatureConfig,

    /// Bindings this IdP will deliver assertions over.
    pub supported_bindings: Vec<SamlBinding>,

    /// Assertion lifetime when the SP declares no override.
    pub default_assertion_lifetime: Duration,

    /// Session duration used for SessionNotOnOrAfter.
    pub session_duration: Duration,

    /// Default for signing assertions (SP override wins).
    pub sign_assertion: bool,

    /// Default for signing responses (SP override wins).
    pub sign_response: bool,

    /// Default for encrypting assertions (SP override wins).
    pub encrypt_assertion: bool,

    /// Default for encrypting name identifiers (SP override wins).
    pub encrypt_name_id: bool,

    /// Whether upstream-proxy-supplied authentication contexts are honored.
    pub proxy_mode: bool,

    /// Whether Holder-of-Key subject confirmation may be issued.
    pub holder_of_key: bool,

    /// IdP-wide attribute encoding table (SP entries override).
    pub attribute_encodings: HashMap<String, AttributeEncoding>,
}

impl IdpConfig {
    /// Creates a configuration with the conventional defaults.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        signing_key_der: Vec<u8>,
        certificate_chain_der: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            signing_key_der,
            certificate_chain_der,
            signature_config: SignatureConfig::default(),
            supported_bindings: vec![
                SamlBinding::HttpPost,
                SamlBinding::HttpArtifact,
            ],
            default_assertion_lifetime: Duration::seconds(300),
            session_duration: Duration::hours(8),
            sign_assertion: false,
            sign_response: true,
            encrypt_assertion: false,
            encrypt_name_id: false,
            proxy_mode: false,
            holder_of_key: false,
            attribute_encodings: HashMap::new(),
        }
    }
}

/// Per-SP configuration as read from metadata.
#[derive(Debug, Clone, Default)]
pub struct SpConfig {
    /// The SP entity ID.
    pub entity_id: String,

    /// Assertion consumer service endpoints.
    pub acs_endpoints: Vec<Endpoint>,

    /// Single logout endpoints.
    pub slo_endpoints: Vec<Endpoint>,

    /// Certificates trusted for this SP's request signatures (DER).
    pub signing_certificates: Vec<Vec<u8>>,

    /// Whether AuthnRequests from this SP must be signed.
    pub want_authn_requests_signed: bool,

    /// Accept a caller-supplied ACS URL outside metadata when the request
    /// is signed. Deliberately risky, off by default, per-SP opt-in.
    pub skip_endpoint_validation_when_signed: bool,

    /// Sign assertions for this SP (overrides the IdP default).
    pub sign_assertion: Option<bool>,

    /// Sign responses for this SP (overrides the IdP default).
    pub sign_response: Option<bool>,

    /// Encrypt assertions for this SP (overrides the IdP default).
    pub encrypt_assertion: Option<bool>,

    /// Encrypt name identifiers for this SP (overrides the IdP default).
    pub encrypt_name_id: Option<bool>,

    /// Certificate used to encrypt for this SP (DER).
    pub encryption_certificate: Option<Vec<u8>>,

    /// Assertion lifetime override.
    pub assertion_lifetime: Option<Duration>,

    /// Audiences granted in addition to the SP entity ID.
    pub extra_audiences: Vec<String>,

    /// SPNameQualifier override for generated name identifiers.
    pub sp_name_qualifier: Option<String>,

    /// NameID format preference when the request carries no policy.
    pub name_id_format: Option<String>,

    /// Per-SP attribute encoding table (overrides the IdP table).
    pub attribute_encodings: HashMap<String, AttributeEncoding>,
}

impl SpConfig {
    /// Creates a configuration for the given entity.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Self::default()
        }
    }

    /// Resolved sign-assertion flag (SP over IdP).
    #[must_use]
    pub fn resolve_sign_assertion(&self, idp: &IdpConfig) -> bool {
        self.sign_assertion.unwrap_or(idp.sign_assertion)
    }

    /// Resolved sign-response flag (SP over IdP).
    #[must_use]
    pub fn resolve_sign_response(&self, idp: &IdpConfig) -> bool {
        self.sign_response.unwrap_or(idp.sign_response)
    }

    /// Resolved encrypt-assertion flag (SP over IdP).
    #[must_use]
    pub fn resolve_encrypt_assertion(&self, idp: &IdpConfig) -> bool {
        self.encrypt_assertion.unwrap_or(idp.encrypt_assertion)
    }

    /// Resolved encrypt-name-id flag (SP over IdP).
    #[must_use]
    pub fn resolve_encrypt_name_id(&self, idp: &IdpConfig) -> bool {
        self.encrypt_name_id.unwrap_or(idp.encrypt_name_id)
    }

    /// Resolved assertion lifetime (SP over IdP).
    #[must_use]
    pub fn resolve_assertion_lifetime(&self, idp: &IdpConfig) -> Duration {
        self.assertion_lifetime
            .unwrap_or(idp.default_assertion_lifetime)
    }

    /// Looks up the encoding for an attribute (SP table over IdP table).
    #[must_use]
    pub fn resolve_attribute_encoding(&self, idp: &IdpConfig, name: &str) -> AttributeEncoding {
        self.attribute_encodings
            .get(name)
            .or_else(|| idp.attribute_encodings.get(name))
            .copied()
            .unwrap_or_default()
    }
}

/// Read-only provider of per-entity configuration.
pub trait MetadataProvider: Send + Sync {
    /// Returns the SP configuration for an entity in a metadata set.
    fn sp_config(&self, metadata_set: &str, entity_id: &str) -> SamlResult<Option<SpConfig>>;
}

/// In-process metadata provider.
#[derive(Debug, Default)]
pub struct InMemoryMetadataProvider {
    entries: HashMap<(String, String), SpConfig>,
}

impl InMemoryMetadataProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an SP in a metadata set.
    pub fn insert(&mut self, metadata_set: impl Into<String>, sp: SpConfig) {
        self.entries
            .insert((metadata_set.into(), sp.entity_id.clone()), sp);
    }
}

impl MetadataProvider for InMemoryMetadataProvider {
    fn sp_config(&self, metadata_set: &str, entity_id: &str) -> SamlResult<Option<SpConfig>> {
        Ok(self
            .entries
            .get(&(metadata_set.to_string(), entity_id.to_string()))
            .cloned())
    }
}

/// An IdP-side record linking an authenticated session to one SP.
#[derive(Debug, Clone)]
pub struct Association {
    /// The SP entity ID.
    pub sp_entity_id: String,
    /// The NameID bound to that SP.
    pub name_id: NameId,
    /// The session index issued to that SP.
    pub session_index: String,
}

/// Session/association store.
pub trait AssociationStore: Send + Sync {
    /// Returns the NameID already bound for this user at this SP in the
    /// requested format, if any.
    fn name_id_for(
        &self,
        user_id: &str,
        sp_entity_id: &str,
        format: Option<&str>,
    ) -> SamlResult<Option<NameId>>;

    /// Records a new association.
    fn add(&self, user_id: &str, association: Association) -> SamlResult<()>;

    /// All active associations for a user.
    fn associations_for(&self, user_id: &str) -> SamlResult<Vec<Association>>;

    /// Removes associations for a user at an SP, optionally narrowed to a
    /// session index. Returns the number removed.
    fn remove(
        &self,
        user_id: &str,
        sp_entity_id: &str,
        session_index: Option<&str>,
    ) -> SamlResult<usize>;
}

/// In-process association store.
#[derive(Debug, Default)]
pub struct InMemoryAssociationStore {
    entries: Mutex<HashMap<String, Vec<Association>>>,
}

impl InMemoryAssociationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssociationStore for InMemoryAssociationStore {
    fn name_id_for(
        &self,
        user_id: &str,
        sp_entity_id: &str,
        format: Option<&str>,
    ) -> SamlResult<Option<NameId>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SamlError::Internal("association store lock poisoned".to_string()))?;
        Ok(entries.get(user_id).and_then(|assocs| {
            assocs
                .iter()
                .filter(|a| a.sp_entity_id == sp_entity_id)
                .find(|a| format.is_none() || a.name_id.format.as_deref() == format)
                .map(|a| a.name_id.clone())
        }))
    }

    fn add(&self, user_id: &str, association: Association) -> SamlResult<()> {
        self.entries
            .lock()
            .map_err(|_| SamlError::Internal("association store lock poisoned".to_string()))?
            .entry(user_id.to_string())
            .or_default()
            .push(association);
        Ok(())
    }

    fn associations_for(&self, user_id: &str) -> SamlResult<Vec<Association>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SamlError::Internal("association store lock poisoned".to_string()))?;
        Ok(entries.get(user_id).cloned().unwrap_or_default())
    }

    fn remove(
        &self,
        user_id: &str,
        sp_entity_id: &str,
        session_index: Option<&str>,
    ) -> SamlResult<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SamlError::Internal("association store lock poisoned".to_string()))?;
        let Some(assocs) = entries.get_mut(user_id) else {
            return Ok(0);
        };
        let before = assocs.len();
        assocs.retain(|a| {
            a.sp_entity_id != sp_entity_id
                || session_index.is_some_and(|idx| a.session_index != idx)
        });
        Ok(before - assocs.len())
    }
}

/// A suspended SSO flow: the stage tag plus everything needed to resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowCursor {
    /// The stage tag the flow was suspended under.
    pub stage: String,
    /// The serialized AuthnRequest being answered.
    pub request_xml: String,
    /// The relay state carried with it.
    pub relay_state: Option<String>,
}

impl FlowCursor {
    /// Serializes the cursor for an external state store.
    pub fn to_json(&self) -> SamlResult<String> {
        serde_json::to_string(self).map_err(|e| SamlError::FlowState(e.to_string()))
    }

    /// Restores a cursor from its serialized form.
    pub fn from_json(json: &str) -> SamlResult<Self> {
        serde_json::from_str(json).map_err(|e| SamlError::FlowState(e.to_string()))
    }
}

/// Suspend/resume capability for mid-flow handoffs.
///
/// The contract is deliberately narrow: serialize a context under a stage
/// tag, later hand back a context matching that stage tag or fail.
pub trait FlowStateStore: Send + Sync {
    /// Persists the cursor and returns an opaque resume token.
    fn suspend(&self, cursor: &FlowCursor) -> SamlResult<String>;

    /// Restores the cursor for a token; the stored stage must match.
    fn resume(&self, stage: &str, token: &str) -> SamlResult<FlowCursor>;
}

/// In-process flow state store.
#[derive(Debug, Default)]
pub struct InMemoryFlowStateStore {
    entries: Mutex<HashMap<String, FlowCursor>>,
}

impl InMemoryFlowStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowStateStore for InMemoryFlowStateStore {
    fn suspend(&self, cursor: &FlowCursor) -> SamlResult<String> {
        let token = crate::types::new_message_id();
        self.entries
            .lock()
            .map_err(|_| SamlError::FlowState("state store lock poisoned".to_string()))?
            .insert(token.clone(), cursor.clone());
        Ok(token)
    }

    fn resume(&self, stage: &str, token: &str) -> SamlResult<FlowCursor> {
        let cursor = self
            .entries
            .lock()
            .map_err(|_| SamlError::FlowState("state store lock poisoned".to_string()))?
            .remove(token)
            .ok_or_else(|| SamlError::FlowState(format!("no suspended flow for token {token}")))?;
        if cursor.stage != stage {
            return Err(SamlError::FlowState(format!(
                "suspended flow is at stage {:?}, expected {stage:?}",
                cursor.stage
            )));
        }
        Ok(cursor)
    }
}

/// The authenticated-session input to assertion construction.
#[derive(Debug, Clone)]
pub struct AuthnState {
    /// The local user identifier.
    pub user_id: String,
    /// When the user authenticated.
    pub authn_instant: DateTime<Utc>,
    /// Explicit authentication context carried in authentication state.
    pub context_class_ref: Option<String>,
    /// Context supplied by an upstream proxy (honored in proxy mode only).
    pub proxied_context_class_ref: Option<String>,
    /// Attributes to release, in release order.
    pub attributes: Vec<(String, Vec<String>)>,
}

impl AuthnState {
    /// Creates authentication state for a user authenticated now.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            authn_instant: Utc::now(),
            context_class_ref: None,
            proxied_context_class_ref: None,
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute to release.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.push((
            name.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }
}

/// Transport facts about the current inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Whether the request arrived over HTTPS.
    pub https: bool,
    /// The mutual-TLS client certificate, when one was presented (DER).
    pub client_certificate_der: Option<Vec<u8>>,
}
