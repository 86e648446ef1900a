//! Single logout fan-out.
//!
//! Logout propagates to every SP the user holds an active association
//! with. Each association gets its own LogoutRequest over its preferred
//! binding (Redirect before POST); a failure on one association marks the
//! overall result as partial logout instead of aborting the rest.

use crate::bindings::{
    DecodedMessage, HttpPostBinding, HttpRedirectBinding, SamlMessageType, TransportAction,
};
use crate::error::{SamlError, SamlResult};
use crate::signature::{SignedElement, VerificationKey, XmlSigner};
use crate::types::{LogoutRequest, LogoutResponse, SamlBinding};

use super::providers::{
    Association, AssociationStore, Endpoint, IdpConfig, MetadataProvider, SpConfig,
};

/// A logout request prepared for one association.
#[derive(Debug)]
pub struct LogoutDispatch {
    /// The SP this request goes to.
    pub sp_entity_id: String,
    /// The transport action delivering it.
    pub action: TransportAction,
}

/// Single logout handler.
pub struct LogoutHandler<'a> {
    idp: &'a IdpConfig,
    metadata: &'a dyn MetadataProvider,
    associations: &'a dyn AssociationStore,
}

impl<'a> LogoutHandler<'a> {
    /// Creates a handler over the IdP configuration and its collaborators.
    #[must_use]
    pub fn new(
        idp: &'a IdpConfig,
        metadata: &'a dyn MetadataProvider,
        associations: &'a dyn AssociationStore,
    ) -> Self {
        Self {
            idp,
            metadata,
            associations,
        }
    }

    fn signer(&self) -> XmlSigner {
        XmlSigner::new(
            self.idp.signing_key_der.clone(),
            self.idp.certificate_chain_der.clone(),
        )
        .with_config(self.idp.signature_config.clone())
    }

    /// Deserializes and validates an inbound LogoutRequest.
    ///
    /// Routes through the same signature validation as SSO before the
    /// caller dispatches to session-termination logic.
    pub fn receive_request(
        &self,
        metadata_set: &str,
        decoded: &DecodedMessage,
    ) -> SamlResult<LogoutRequest> {
        let mut request = LogoutRequest::parse(&decoded.xml)?;
        request.relay_state = decoded.relay_state.clone();
        let sp = self.sp_config(metadata_set, &request.issuer)?;
        self.check_signature(&sp, &request)?;
        Ok(request)
    }

    /// Deserializes and validates an inbound LogoutResponse.
    pub fn receive_response(
        &self,
        metadata_set: &str,
        decoded: &DecodedMessage,
    ) -> SamlResult<LogoutResponse> {
        let mut response = LogoutResponse::parse(&decoded.xml)?;
        response.relay_state = decoded.relay_state.clone();
        let sp = self.sp_config(metadata_set, &response.issuer)?;
        self.check_signature(&sp, &response)?;
        Ok(response)
    }

    /// Fans logout out across the user's other active associations and
    /// answers the initiating party.
    ///
    /// `send` performs the actual delivery of each prepared dispatch; an
    /// error marks that association as failed without stopping the rest.
    /// The response to the initiator carries Success, with the
    /// PartialLogout second-level code when any association failed.
    pub fn fan_out<F>(
        &self,
        metadata_set: &str,
        user_id: &str,
        initiator: &LogoutRequest,
        mut send: F,
    ) -> SamlResult<TransportAction>
    where
        F: FnMut(&LogoutDispatch) -> SamlResult<()>,
    {
        self.associations.remove(
            user_id,
            &initiator.issuer,
            initiator.session_indexes.first().map(String::as_str),
        )?;

        let mut failures = 0usize;
        for association in self
            .associations
            .associations_for(user_id)?
            .into_iter()
            .filter(|a| a.sp_entity_id != initiator.issuer)
        {
            match self.prepare_dispatch(metadata_set, &association) {
                Ok(dispatch) => {
                    if let Err(e) = send(&dispatch) {
                        tracing::warn!(
                            sp = %dispatch.sp_entity_id,
                            error = %e,
                            "logout delivery failed"
                        );
                        failures += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        sp = %association.sp_entity_id,
                        error = %e,
                        "could not prepare logout request"
                    );
                    failures += 1;
                }
            }
        }

        self.answer_initiator(metadata_set, initiator, failures)
    }

    /// Builds the LogoutRequest for one association over its preferred
    /// binding.
    fn prepare_dispatch(
        &self,
        metadata_set: &str,
        association: &Association,
    ) -> SamlResult<LogoutDispatch> {
        let sp = self.sp_config(metadata_set, &association.sp_entity_id)?;
        let endpoint = preferred_slo_endpoint(&sp)?;

        let request = LogoutRequest::new(
            self.idp.entity_id.clone(),
            association.name_id.clone(),
        )
        .with_session_index(association.session_index.clone())
        .with_destination(endpoint.location.clone());

        let action = self.deliver_request(&request, &endpoint, sp.resolve_sign_response(self.idp))?;
        Ok(LogoutDispatch {
            sp_entity_id: association.sp_entity_id.clone(),
            action,
        })
    }

    fn deliver_request(
        &self,
        request: &LogoutRequest,
        endpoint: &Endpoint,
        sign: bool,
    ) -> SamlResult<TransportAction> {
        match endpoint.binding {
            SamlBinding::HttpRedirect => {
                let action = HttpRedirectBinding::send(
                    &request.to_xml(),
                    &endpoint.location,
                    request.relay_state.as_deref(),
                    SamlMessageType::Request,
                )?;
                self.append_redirect_signature(action, sign)
            }
            _ => {
                let mut el = request.to_element();
                if sign {
                    self.signer().sign_element(&mut el, &request.id)?;
                }
                Ok(HttpPostBinding::send(
                    &el.to_xml(),
                    &endpoint.location,
                    request.relay_state.as_deref(),
                    SamlMessageType::Request,
                ))
            }
        }
    }

    fn answer_initiator(
        &self,
        metadata_set: &str,
        initiator: &LogoutRequest,
        failures: usize,
    ) -> SamlResult<TransportAction> {
        let sp = self.sp_config(metadata_set, &initiator.issuer)?;
        let endpoint = preferred_slo_endpoint(&sp)?;

        let response = if failures > 0 {
            tracing::warn!(failures, "logout completed partially");
            LogoutResponse::partial_logout(self.idp.entity_id.clone())
        } else {
            LogoutResponse::success(self.idp.entity_id.clone())
        }
        .in_response_to(initiator.id.clone())
        .with_destination(endpoint.response_location().to_string());

        match endpoint.binding {
            SamlBinding::HttpRedirect => {
                let action = HttpRedirectBinding::send(
                    &response.to_xml(),
                    endpoint.response_location(),
                    initiator.relay_state.as_deref(),
                    SamlMessageType::Response,
                )?;
                self.append_redirect_signature(action, sp.resolve_sign_response(self.idp))
            }
            _ => {
                let mut el = response.to_element();
                if sp.resolve_sign_response(self.idp) {
                    self.signer().sign_element(&mut el, &response.id)?;
                }
                Ok(HttpPostBinding::send(
                    &el.to_xml(),
                    endpoint.response_location(),
                    initiator.relay_state.as_deref(),
                    SamlMessageType::Response,
                ))
            }
        }
    }

    /// Adds the detached query-string signature to a redirect action.
    fn append_redirect_signature(
        &self,
        action: TransportAction,
        sign: bool,
    ) -> SamlResult<TransportAction> {
        if !sign || self.idp.signing_key_der.is_empty() {
            return Ok(action);
        }
        let TransportAction::Redirect { url } = action else {
            return Ok(action);
        };
        let parsed = url::Url::parse(&url)
            .map_err(|e| SamlError::Internal(format!("invalid redirect URL: {e}")))?;
        let (param, value) = parsed
            .query_pairs()
            .find(|(k, _)| k == "SAMLRequest" || k == "SAMLResponse")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .ok_or_else(|| SamlError::Internal("redirect URL carries no message".to_string()))?;
        let relay_state = parsed
            .query_pairs()
            .find(|(k, _)| k == "RelayState")
            .map(|(_, v)| v.into_owned());

        let signer = self.signer();
        let signature = signer.sign_redirect_query(&param, &value, relay_state.as_deref())?;
        Ok(TransportAction::Redirect {
            url: HttpRedirectBinding::append_signature(
                url,
                self.idp.signature_config.algorithm.uri(),
                &signature,
            ),
        })
    }

    fn sp_config(&self, metadata_set: &str, entity_id: &str) -> SamlResult<SpConfig> {
        self.metadata
            .sp_config(metadata_set, entity_id)?
            .ok_or_else(|| {
                SamlError::Metadata(format!("unknown service provider: {entity_id}"))
            })
    }

    fn check_signature<M: SignedElement>(&self, sp: &SpConfig, message: &M) -> SamlResult<()> {
        let Some((el, _)) = message.signed_source() else {
            return Ok(());
        };
        if el.children_named("Signature").next().is_none() {
            if sp.want_authn_requests_signed {
                return Err(SamlError::SignatureInvalid(format!(
                    "{} requires signed logout messages",
                    sp.entity_id
                )));
            }
            return Ok(());
        }

        let mut last_err = SamlError::SignatureInvalid(format!(
            "no signing certificate configured for {}",
            sp.entity_id
        ));
        for cert in &sp.signing_certificates {
            let key = VerificationKey::from_certificate_der(cert)?;
            match message.validate_signature(&key) {
                Ok(true) => return Ok(()),
                Ok(false) => break,
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

/// The fixed binding priority for logout: Redirect before POST.
fn preferred_slo_endpoint(sp: &SpConfig) -> SamlResult<Endpoint> {
    for binding in [SamlBinding::HttpRedirect, SamlBinding::HttpPost] {
        if let Some(endpoint) = sp.slo_endpoints.iter().find(|e| e.binding == binding) {
            return Ok(endpoint.clone());
        }
    }
    Err(SamlError::NoUsableEndpoint(format!(
        "{} declares no single logout endpoint over Redirect or POST",
        sp.entity_id
    )))
}
