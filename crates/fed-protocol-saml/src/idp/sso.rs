//! IdP single sign-on orchestration.
//!
//! The state machine answering one AuthnRequest: validate the inbound
//! message, select the ACS endpoint, build the assertion, then optionally
//! encrypt and sign before handing the response to the binding layer.
//! When no authenticated session exists yet, the flow suspends into a
//! stage-tagged cursor and resumes once authentication has happened.

use crate::bindings::{
    ArtifactStore, DecodedMessage, HttpArtifactBinding, HttpPostBinding, HttpRedirectBinding,
    SamlMessageType, SoapEnvelope, TransportAction,
};
use crate::encryption::{encrypt_element, EncryptionAlgorithm, EncryptionKey};
use crate::error::{SamlError, SamlResult};
use crate::signature::{SignedElement, VerificationKey, XmlSigner};
use crate::types::{AuthnRequest, Response, SamlBinding};
use crate::xml::Element;

use super::assertion_builder::build_assertion;
use super::endpoint::{select_acs_endpoint, EndpointFilter};
use super::providers::{
    AssociationStore, AuthnState, Endpoint, FlowCursor, FlowStateStore, IdpConfig,
    MetadataProvider, RequestContext, SpConfig,
};

/// Stage tag under which pending SSO flows are suspended.
pub const SSO_AUTHN_STAGE: &str = "saml:sso:authn";

/// What the caller must do next with an inbound AuthnRequest.
#[derive(Debug)]
pub enum SsoOutcome {
    /// No authenticated session yet: suspend under this cursor, run the
    /// authentication machinery, then resume.
    AuthenticationRequired(FlowCursor),
    /// The response is ready for transport.
    Deliver(TransportAction),
}

/// SSO request handler.
pub struct SsoHandler<'a> {
    idp: &'a IdpConfig,
    metadata: &'a dyn MetadataProvider,
    associations: &'a dyn AssociationStore,
    artifacts: &'a dyn ArtifactStore,
}

impl<'a> SsoHandler<'a> {
    /// Creates a handler over the IdP configuration and its collaborators.
    #[must_use]
    pub fn new(
        idp: &'a IdpConfig,
        metadata: &'a dyn MetadataProvider,
        associations: &'a dyn AssociationStore,
        artifacts: &'a dyn ArtifactStore,
    ) -> Self {
        Self {
            idp,
            metadata,
            associations,
            artifacts,
        }
    }

    fn signer(&self) -> XmlSigner {
        XmlSigner::new(
            self.idp.signing_key_der.clone(),
            self.idp.certificate_chain_der.clone(),
        )
        .with_config(self.idp.signature_config.clone())
    }

    /// Deserializes an inbound AuthnRequest, reattaching its relay state.
    pub fn receive(&self, decoded: &DecodedMessage) -> SamlResult<AuthnRequest> {
        let mut request = AuthnRequest::parse(&decoded.xml)?;
        request.relay_state = decoded.relay_state.clone();
        Ok(request)
    }

    /// Processes an inbound request: either everything needed to answer is
    /// at hand, or the flow suspends for authentication.
    pub fn process(
        &self,
        metadata_set: &str,
        decoded: &DecodedMessage,
        authn: Option<&AuthnState>,
        context: &RequestContext,
    ) -> SamlResult<SsoOutcome> {
        let request = self.receive(decoded)?;
        match authn {
            Some(state) => Ok(SsoOutcome::Deliver(self.respond(
                metadata_set,
                &request,
                state,
                context,
            )?)),
            None => Ok(SsoOutcome::AuthenticationRequired(FlowCursor {
                stage: SSO_AUTHN_STAGE.to_string(),
                request_xml: decoded.xml.clone(),
                relay_state: decoded.relay_state.clone(),
            })),
        }
    }

    /// Suspends a pending request into the external state store.
    pub fn suspend(
        &self,
        store: &dyn FlowStateStore,
        cursor: &FlowCursor,
    ) -> SamlResult<String> {
        store.suspend(cursor)
    }

    /// Resumes a suspended flow and answers it with the now-authenticated
    /// session.
    pub fn resume(
        &self,
        store: &dyn FlowStateStore,
        token: &str,
        metadata_set: &str,
        authn: &AuthnState,
        context: &RequestContext,
    ) -> SamlResult<TransportAction> {
        let cursor = store.resume(SSO_AUTHN_STAGE, token)?;
        let mut request = AuthnRequest::parse(&cursor.request_xml)?;
        request.relay_state = cursor.relay_state;
        self.respond(metadata_set, &request, authn, context)
    }

    /// Builds and encodes the response to a validated AuthnRequest.
    pub fn respond(
        &self,
        metadata_set: &str,
        request: &AuthnRequest,
        authn: &AuthnState,
        context: &RequestContext,
    ) -> SamlResult<TransportAction> {
        let sp = self.sp_config(metadata_set, &request.issuer)?;
        let request_validated = self.check_request_signature(&sp, request)?;

        let endpoint = select_acs_endpoint(
            &sp,
            &self.idp.supported_bindings,
            &EndpointFilter::from_request(request),
            request_validated,
        )?;

        let assertion = build_assertion(
            self.idp,
            &sp,
            request,
            authn,
            &endpoint,
            context,
            self.associations,
        )?;

        self.package_and_deliver(
            &sp,
            &endpoint,
            assertion,
            Some(&request.id),
            request.relay_state.as_deref(),
        )
    }

    /// IdP-initiated SSO: no AuthnRequest arrives, the target SP comes
    /// from query parameters. The response carries no InResponseTo.
    pub fn initiate(
        &self,
        metadata_set: &str,
        sp_entity_id: &str,
        relay_state: Option<&str>,
        authn: &AuthnState,
        context: &RequestContext,
    ) -> SamlResult<TransportAction> {
        let sp = self.sp_config(metadata_set, sp_entity_id)?;
        let endpoint = select_acs_endpoint(
            &sp,
            &self.idp.supported_bindings,
            &EndpointFilter::default(),
            false,
        )?;

        // A placeholder request carries the SP identity through assertion
        // construction; nothing request-scoped survives into the output.
        let placeholder = AuthnRequest::new(sp_entity_id);
        let mut assertion = build_assertion(
            self.idp,
            &sp,
            &placeholder,
            authn,
            &endpoint,
            context,
            self.associations,
        )?;
        if let Some(subject) = assertion.subject.as_mut() {
            for confirmation in &mut subject.confirmations {
                if let Some(data) = confirmation.data.as_mut() {
                    data.in_response_to = None;
                }
            }
        }

        self.package_and_deliver(&sp, &endpoint, assertion, None, relay_state)
    }

    /// Shared tail of both SSO entry points: sign the assertion, encrypt
    /// it, sign the enclosing response, hand to the binding layer.
    fn package_and_deliver(
        &self,
        sp: &SpConfig,
        endpoint: &Endpoint,
        assertion: crate::types::Assertion,
        in_response_to: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<TransportAction> {
        let mut assertion_el = assertion.to_element();
        if sp.resolve_sign_assertion(self.idp) {
            self.signer().sign_element(&mut assertion_el, &assertion.id)?;
        }

        let mut response = Response::success(self.idp.entity_id.clone())
            .with_destination(endpoint.location.clone());
        if let Some(request_id) = in_response_to {
            response = response.in_response_to(request_id);
        }
        let response_id = response.id.clone();
        let mut response_el = response.to_element();

        if sp.resolve_encrypt_assertion(self.idp) {
            let encrypted = encrypt_element(&assertion_el, &self.encryption_key(sp)?)?;
            response_el.push(encrypted.to_wrapper("saml:EncryptedAssertion"));
        } else {
            response_el.push(assertion_el);
        }

        if sp.resolve_sign_response(self.idp) {
            self.signer().sign_element(&mut response_el, &response_id)?;
        }

        self.deliver(&response_el.to_xml(), endpoint, relay_state)
    }

    /// Answers a terminal error with a protocol-level error response, when
    /// a verified destination exists. Callers surface the original error
    /// directly when this fails (there is nowhere trustworthy to send it).
    pub fn error_response(
        &self,
        metadata_set: &str,
        request: &AuthnRequest,
        err: &SamlError,
    ) -> SamlResult<TransportAction> {
        let sp = self.sp_config(metadata_set, &request.issuer)?;
        let endpoint = select_acs_endpoint(
            &sp,
            &self.idp.supported_bindings,
            &EndpointFilter::from_request(request),
            false,
        )?;

        let response = Response::from_error(self.idp.entity_id.clone(), err)
            .in_response_to(request.id.clone())
            .with_destination(endpoint.location.clone());
        let response_id = response.id.clone();
        let mut response_el = response.to_element();
        if sp.resolve_sign_response(self.idp) {
            self.signer().sign_element(&mut response_el, &response_id)?;
        }

        self.deliver(
            &response_el.to_xml(),
            &endpoint,
            request.relay_state.as_deref(),
        )
    }

    fn sp_config(&self, metadata_set: &str, entity_id: &str) -> SamlResult<SpConfig> {
        self.metadata
            .sp_config(metadata_set, entity_id)?
            .ok_or_else(|| {
                SamlError::Metadata(format!("unknown service provider: {entity_id}"))
            })
    }

    /// Enforces the SP's signing policy on the inbound request and returns
    /// whether a signature was present and validated. That fact gates the
    /// endpoint-selection trust relaxation.
    fn check_request_signature(
        &self,
        sp: &SpConfig,
        request: &AuthnRequest,
    ) -> SamlResult<bool> {
        if !request.has_signature() {
            if sp.want_authn_requests_signed {
                return Err(SamlError::SignatureInvalid(format!(
                    "{} requires signed authentication requests",
                    sp.entity_id
                )));
            }
            return Ok(false);
        }

        let mut last_err = SamlError::SignatureInvalid(format!(
            "no signing certificate configured for {}",
            sp.entity_id
        ));
        for cert in &sp.signing_certificates {
            let key = VerificationKey::from_certificate_der(cert)?;
            match request.validate_signature(&key) {
                Ok(true) => {
                    tracing::debug!(sp = %sp.entity_id, "AuthnRequest signature validated");
                    return Ok(true);
                }
                Ok(false) => break,
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn encryption_key(&self, sp: &SpConfig) -> SamlResult<EncryptionKey> {
        let cert = sp.encryption_certificate.as_ref().ok_or_else(|| {
            SamlError::UnsupportedKeyType(format!(
                "{} has no encryption certificate configured",
                sp.entity_id
            ))
        })?;
        let spki = VerificationKey::from_certificate_der(cert)?;
        Ok(EncryptionKey::RsaPublic {
            algorithm: EncryptionAlgorithm::RsaOaepMgf1p,
            spki_der: spki.spki_der().to_vec(),
        })
    }

    fn deliver(
        &self,
        xml: &str,
        endpoint: &Endpoint,
        relay_state: Option<&str>,
    ) -> SamlResult<TransportAction> {
        match endpoint.binding {
            SamlBinding::HttpPost | SamlBinding::HokSso => Ok(HttpPostBinding::send(
                xml,
                &endpoint.location,
                relay_state,
                SamlMessageType::Response,
            )),
            SamlBinding::HttpArtifact => HttpArtifactBinding::send(
                xml,
                &endpoint.location,
                relay_state,
                &self.idp.entity_id,
                endpoint.index.unwrap_or(0),
                self.artifacts,
            ),
            SamlBinding::HttpRedirect => HttpRedirectBinding::send(
                xml,
                &endpoint.location,
                relay_state,
                SamlMessageType::Response,
            ),
            SamlBinding::Soap => Ok(TransportAction::SoapEnvelope {
                xml: SoapEnvelope::wrap(xml),
            }),
        }
    }
}

/// Serves the IdP side of SOAP artifact resolution: looks the artifact up
/// in the shared store and wraps the stored message in an
/// ArtifactResponse envelope.
pub fn handle_artifact_resolve(
    idp: &IdpConfig,
    store: &dyn ArtifactStore,
    request_xml: &str,
) -> SamlResult<TransportAction> {
    let doc = crate::xml::XmlDoc::parse(request_xml)?;
    let request = doc.root();
    if request.local_name() != "ArtifactResolve" {
        return Err(SamlError::XmlParse(format!(
            "expected ArtifactResolve, got {}",
            request.local_name()
        )));
    }
    let artifact = request.required_child("Artifact")?.text();
    let message = HttpArtifactBinding::resolve(&artifact, store)?;
    let request_id = request
        .attr("ID")
        .ok_or_else(|| SamlError::MissingElement("ArtifactResolve ID".to_string()))?;

    let mut response = Element::new("samlp:ArtifactResponse");
    crate::types::declare_message_namespaces(&mut response);
    response.set_attr("ID", crate::types::new_message_id());
    response.set_attr("Version", "2.0");
    response.set_attr(
        "IssueInstant",
        crate::types::format_instant(chrono::Utc::now()),
    );
    response.set_attr("InResponseTo", request_id);
    response.push(Element::new("saml:Issuer").with_text(idp.entity_id.clone()));
    response.push(
        Element::new("samlp:Status").with_child(
            Element::new("samlp:StatusCode")
                .with_attr("Value", crate::types::status_codes::SUCCESS),
        ),
    );
    response.push(Element::parse(&message)?);

    Ok(TransportAction::SoapEnvelope {
        xml: SoapEnvelope::wrap(&response.to_xml()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::InMemoryArtifactStore;
    use crate::idp::providers::{InMemoryAssociationStore, InMemoryMetadataProvider};

    fn idp_config() -> IdpConfig {
        let mut idp = IdpConfig::new("https://idp.example.com", Vec::new(), Vec::new());
        // No signing key in these fixtures.
        idp.sign_response = false;
        idp
    }

    fn metadata_with(sp: SpConfig) -> InMemoryMetadataProvider {
        let mut metadata = InMemoryMetadataProvider::new();
        metadata.insert("default-sp", sp);
        metadata
    }

    #[test]
    fn unknown_sp_is_rejected() {
        let idp = idp_config();
        let metadata = InMemoryMetadataProvider::new();
        let associations = InMemoryAssociationStore::new();
        let artifacts = InMemoryArtifactStore::new();
        let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

        let request = AuthnRequest::new("https://unknown.example.com");
        let err = handler
            .respond(
                "default-sp",
                &request,
                &AuthnState::new("user1"),
                &RequestContext::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SamlError::Metadata(_)));
    }

    #[test]
    fn unsigned_request_is_refused_when_sp_requires_signing() {
        let idp = idp_config();
        let mut sp = SpConfig::new("https://sp.example.com");
        sp.want_authn_requests_signed = true;
        sp.acs_endpoints = vec![Endpoint::new(
            "https://sp.example.com/acs",
            SamlBinding::HttpPost,
        )];
        let metadata = metadata_with(sp);
        let associations = InMemoryAssociationStore::new();
        let artifacts = InMemoryArtifactStore::new();
        let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

        let request = AuthnRequest::new("https://sp.example.com");
        let err = handler
            .respond(
                "default-sp",
                &request,
                &AuthnState::new("user1"),
                &RequestContext::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SamlError::SignatureInvalid(_)));
    }

    #[test]
    fn process_without_session_suspends() {
        let idp = idp_config();
        let sp = SpConfig::new("https://sp.example.com");
        let metadata = metadata_with(sp);
        let associations = InMemoryAssociationStore::new();
        let artifacts = InMemoryArtifactStore::new();
        let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

        let request = AuthnRequest::new("https://sp.example.com");
        let decoded = DecodedMessage {
            xml: request.to_xml(),
            message_type: SamlMessageType::Request,
            relay_state: Some("rs".to_string()),
            signature: None,
            sig_alg: None,
        };

        let outcome = handler
            .process("default-sp", &decoded, None, &RequestContext::default())
            .unwrap();
        match outcome {
            SsoOutcome::AuthenticationRequired(cursor) => {
                assert_eq!(cursor.stage, SSO_AUTHN_STAGE);
                assert_eq!(cursor.relay_state.as_deref(), Some("rs"));
            }
            SsoOutcome::Deliver(_) => panic!("expected suspension"),
        }
    }
}
