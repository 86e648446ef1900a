//! Assertion consumer service endpoint selection.
//!
//! The decision procedure that determines where an assertion may be sent.
//! Candidates come from SP metadata filtered by the IdP's supported
//! bindings and the request's exact-match constraints; the declared
//! default flag drives priority; and a caller-supplied URL outside
//! metadata is accepted only under the explicit signed-request opt-in.

use crate::error::{SamlError, SamlResult};
use crate::types::{AuthnRequest, SamlBinding};

use super::providers::{Endpoint, SpConfig};

/// Exact-match constraints taken from the request.
#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    /// Required endpoint URL.
    pub url: Option<String>,
    /// Required binding.
    pub binding: Option<SamlBinding>,
    /// Required endpoint index.
    pub index: Option<u16>,
}

impl EndpointFilter {
    /// Builds the filter an AuthnRequest implies.
    #[must_use]
    pub fn from_request(request: &AuthnRequest) -> Self {
        Self {
            url: request.assertion_consumer_service_url.clone(),
            binding: request.parsed_binding(),
            index: request.assertion_consumer_service_index,
        }
    }

    fn matches(&self, endpoint: &Endpoint) -> bool {
        if let Some(url) = &self.url {
            if endpoint.location != *url {
                return false;
            }
        }
        if let Some(binding) = self.binding {
            if endpoint.binding != binding {
                return false;
            }
        }
        if let Some(index) = self.index {
            if endpoint.index != Some(index) {
                return false;
            }
        }
        true
    }
}

/// Picks among matching endpoints by their declared default flag:
/// a true flag wins immediately, an absent flag beats an explicit false.
fn pick_by_default_flag<'a>(candidates: &[&'a Endpoint]) -> Option<&'a Endpoint> {
    candidates
        .iter()
        .find(|e| e.is_default == Some(true))
        .or_else(|| candidates.iter().find(|e| e.is_default.is_none()))
        .or_else(|| candidates.iter().find(|e| e.is_default == Some(false)))
        .copied()
}

/// Selects the ACS endpoint for a request.
///
/// `request_signed` must only be true when the request's signature
/// actually validated; it gates the metadata-bypass trust relaxation.
pub fn select_acs_endpoint(
    sp: &SpConfig,
    supported_bindings: &[SamlBinding],
    filter: &EndpointFilter,
    request_signed: bool,
) -> SamlResult<Endpoint> {
    let supported: Vec<&Endpoint> = sp
        .acs_endpoints
        .iter()
        .filter(|e| supported_bindings.contains(&e.binding))
        .collect();

    let matching: Vec<&Endpoint> = supported
        .iter()
        .copied()
        .filter(|e| filter.matches(e))
        .collect();

    if let Some(endpoint) = pick_by_default_flag(&matching) {
        tracing::debug!(
            sp = %sp.entity_id,
            location = %endpoint.location,
            "ACS endpoint selected from metadata"
        );
        return Ok(endpoint.clone());
    }

    // The caller-supplied URL matched nothing. Only a validated request
    // signature combined with the per-SP opt-in may bypass the metadata
    // allow-list.
    if request_signed && sp.skip_endpoint_validation_when_signed {
        if let Some(url) = &filter.url {
            tracing::warn!(
                sp = %sp.entity_id,
                url = %url,
                "accepting ACS URL outside metadata for signed request"
            );
            return Ok(Endpoint::new(
                url.clone(),
                filter.binding.unwrap_or(SamlBinding::HttpPost),
            ));
        }
    }

    // Fall back to the SP's declared default endpoint for the supported
    // bindings, ignoring the request constraints.
    if let Some(endpoint) = pick_by_default_flag(&supported) {
        tracing::debug!(
            sp = %sp.entity_id,
            location = %endpoint.location,
            "falling back to the SP default ACS endpoint"
        );
        return Ok(endpoint.clone());
    }

    Err(SamlError::NoUsableEndpoint(format!(
        "no ACS endpoint of {} matches the request or the supported bindings",
        sp.entity_id
    )))
}
