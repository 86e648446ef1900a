//! Assertion construction policy.
//!
//! Turns an authenticated session plus SP configuration into the
//! assertion the response will carry: NameID reuse or generation,
//! audience and validity computation, authentication-context priority,
//! subject confirmation (Bearer or Holder-of-Key) and attribute encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};

use crate::error::{SamlError, SamlResult};
use crate::types::{
    Assertion, Attribute, AttributeValue, AuthnContextClass, AuthnRequest, AuthnStatement,
    Conditions, NameId, NameIdFormat, SamlBinding, Subject, SubjectConfirmation,
    SubjectConfirmationData,
};
use crate::xml::Element;

use super::providers::{
    Association, AssociationStore, AttributeEncoding, AuthnState, Endpoint, IdpConfig,
    RequestContext, SpConfig,
};

/// Clock-skew tolerance applied to NotBefore.
const NOT_BEFORE_SKEW: i64 = 30;

/// Builds the assertion answering `request` for an authenticated user.
#[allow(clippy::too_many_arguments)]
pub fn build_assertion(
    idp: &IdpConfig,
    sp: &SpConfig,
    request: &AuthnRequest,
    authn: &AuthnState,
    endpoint: &Endpoint,
    context: &RequestContext,
    associations: &dyn AssociationStore,
) -> SamlResult<Assertion> {
    let now = Utc::now();
    let not_on_or_after = now + sp.resolve_assertion_lifetime(idp);

    let (name_id, session_index) = subject_name_id(sp, request, authn, associations)?;

    let confirmation = subject_confirmation(
        idp,
        endpoint,
        context,
        request,
        not_on_or_after,
    )?;

    let mut audiences: Vec<String> = vec![sp.entity_id.clone()];
    audiences.extend(sp.extra_audiences.iter().cloned());

    let context_class = authn_context_class(idp, authn, context);

    let mut assertion = Assertion::new(idp.entity_id.clone())
        .with_subject(Subject::new(name_id).with_confirmation(confirmation))
        .with_conditions(
            Conditions::with_window(now - Duration::seconds(NOT_BEFORE_SKEW), not_on_or_after)
                .with_audiences(audiences),
        )
        .with_authn_statement(
            AuthnStatement::new(authn.authn_instant, context_class)
                .with_session_index(session_index)
                .with_session_not_on_or_after(authn.authn_instant + idp.session_duration),
        );

    for (name, values) in &authn.attributes {
        assertion = assertion.with_attribute(encode_attribute(idp, sp, name, values)?);
    }

    Ok(assertion)
}

/// Reuses a previously established NameID for this SP where one exists;
/// otherwise generates a fresh identifier and records the association.
fn subject_name_id(
    sp: &SpConfig,
    request: &AuthnRequest,
    authn: &AuthnState,
    associations: &dyn AssociationStore,
) -> SamlResult<(NameId, String)> {
    let requested_format = request
        .name_id_policy
        .as_ref()
        .and_then(|p| p.format.clone())
        .or_else(|| sp.name_id_format.clone());

    let session_index = format!("_session{}", uuid::Uuid::new_v4());

    if let Some(existing) =
        associations.name_id_for(&authn.user_id, &sp.entity_id, requested_format.as_deref())?
    {
        associations.add(
            &authn.user_id,
            Association {
                sp_entity_id: sp.entity_id.clone(),
                name_id: existing.clone(),
                session_index: session_index.clone(),
            },
        )?;
        return Ok((existing, session_index));
    }

    let format = match requested_format.as_deref().map(NameIdFormat::from_uri) {
        None => NameIdFormat::Transient,
        Some(Some(NameIdFormat::Transient)) => NameIdFormat::Transient,
        Some(Some(NameIdFormat::Persistent)) => NameIdFormat::Persistent,
        Some(other) => {
            // A format this IdP cannot mint for an unseen subject.
            tracing::warn!(
                requested = ?requested_format,
                parsed = ?other,
                "requested NameID format cannot be honored, forcing transient"
            );
            NameIdFormat::Transient
        }
    };

    let qualifier = sp
        .sp_name_qualifier
        .clone()
        .unwrap_or_else(|| sp.entity_id.clone());
    let name_id = NameId::new(format!("_{}", uuid::Uuid::new_v4().simple()))
        .with_format(format)
        .with_sp_name_qualifier(qualifier);

    associations.add(
        &authn.user_id,
        Association {
            sp_entity_id: sp.entity_id.clone(),
            name_id: name_id.clone(),
            session_index: session_index.clone(),
        },
    )?;

    Ok((name_id, session_index))
}

/// Bearer unless the chosen binding is the Holder-of-Key profile and the
/// IdP has HoK enabled; HoK requires the mutual-TLS client certificate.
fn subject_confirmation(
    idp: &IdpConfig,
    endpoint: &Endpoint,
    context: &RequestContext,
    request: &AuthnRequest,
    not_on_or_after: chrono::DateTime<Utc>,
) -> SamlResult<SubjectConfirmation> {
    let data = SubjectConfirmationData::for_request(
        request.id.clone(),
        endpoint.location.clone(),
        not_on_or_after,
    );

    if endpoint.binding == SamlBinding::HokSso && idp.holder_of_key {
        let cert = context
            .client_certificate_der
            .as_ref()
            .ok_or(SamlError::MissingClientCertificate)?;
        let mut confirmation = SubjectConfirmation::holder_of_key(BASE64.encode(cert));
        if let Some(hok_data) = confirmation.data.as_mut() {
            hok_data.in_response_to = data.in_response_to;
            hok_data.recipient = data.recipient;
            hok_data.not_on_or_after = data.not_on_or_after;
        }
        return Ok(confirmation);
    }

    Ok(SubjectConfirmation::bearer().with_data(data))
}

/// Authentication context priority: explicit state-carried value, then an
/// upstream-proxy value (proxy mode only), then the scheme default.
fn authn_context_class(idp: &IdpConfig, authn: &AuthnState, context: &RequestContext) -> String {
    if let Some(explicit) = &authn.context_class_ref {
        return explicit.clone();
    }
    if idp.proxy_mode {
        if let Some(proxied) = &authn.proxied_context_class_ref {
            return proxied.clone();
        }
    }
    if context.https {
        AuthnContextClass::PasswordProtectedTransport.uri().to_string()
    } else {
        AuthnContextClass::Password.uri().to_string()
    }
}

/// Encodes one attribute per the merged encoding table.
fn encode_attribute(
    idp: &IdpConfig,
    sp: &SpConfig,
    name: &str,
    values: &[String],
) -> SamlResult<Attribute> {
    let encoding = sp.resolve_attribute_encoding(idp, name);
    let encoded = values
        .iter()
        .map(|value| match encoding {
            AttributeEncoding::String => Ok(AttributeValue::Text(value.clone())),
            AttributeEncoding::Base64 => Ok(AttributeValue::Text(BASE64.encode(value))),
            AttributeEncoding::RawXml => Element::parse(value)
                .map(AttributeValue::Fragment)
                .map_err(|e| {
                    SamlError::UnsupportedAttributeEncoding(format!(
                        "attribute {name} is not a well-formed XML fragment: {e}"
                    ))
                }),
        })
        .collect::<SamlResult<Vec<_>>>()?;

    Ok(Attribute {
        name: name.to_string(),
        values: encoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idp::providers::InMemoryAssociationStore;

    fn fixtures() -> (IdpConfig, SpConfig, AuthnRequest, Endpoint) {
        let idp = IdpConfig::new("https://idp.example.com", Vec::new(), Vec::new());
        let sp = SpConfig::new("https://sp.example.com");
        let request = AuthnRequest::new("https://sp.example.com");
        let endpoint = Endpoint::new("https://sp.example.com/acs", SamlBinding::HttpPost);
        (idp, sp, request, endpoint)
    }

    #[test]
    fn fresh_subject_gets_transient_name_id_and_association() {
        let (idp, sp, request, endpoint) = fixtures();
        let store = InMemoryAssociationStore::new();
        let authn = AuthnState::new("user1");

        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &authn,
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap();

        let name_id = assertion.name_id().unwrap();
        assert_eq!(name_id.parsed_format(), NameIdFormat::Transient);
        assert_eq!(
            name_id.sp_name_qualifier.as_deref(),
            Some("https://sp.example.com")
        );

        let assocs = store.associations_for("user1").unwrap();
        assert_eq!(assocs.len(), 1);
        assert_eq!(assocs[0].name_id.value, name_id.value);
    }

    #[test]
    fn established_name_id_is_reused() {
        let (idp, sp, request, endpoint) = fixtures();
        let store = InMemoryAssociationStore::new();
        store
            .add(
                "user1",
                Association {
                    sp_entity_id: "https://sp.example.com".to_string(),
                    name_id: NameId::persistent("stable-id"),
                    session_index: "_s0".to_string(),
                },
            )
            .unwrap();

        let authn = AuthnState::new("user1");
        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &authn,
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap();
        assert_eq!(assertion.name_id().unwrap().value, "stable-id");
    }

    #[test]
    fn unsatisfiable_format_falls_back_to_transient() {
        let (idp, mut sp, request, endpoint) = fixtures();
        sp.name_id_format = Some(NameIdFormat::Email.uri().to_string());
        let store = InMemoryAssociationStore::new();

        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &AuthnState::new("user1"),
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap();
        assert_eq!(
            assertion.name_id().unwrap().parsed_format(),
            NameIdFormat::Transient
        );
    }

    #[test]
    fn audiences_include_sp_and_extras() {
        let (idp, mut sp, request, endpoint) = fixtures();
        sp.extra_audiences = vec!["https://other.example.com".to_string()];
        let store = InMemoryAssociationStore::new();

        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &AuthnState::new("user1"),
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap();
        let conditions = assertion.conditions.as_ref().unwrap();
        assert!(conditions.permits_audience("https://sp.example.com"));
        assert!(conditions.permits_audience("https://other.example.com"));
        assert!(!conditions.permits_audience("https://unrelated.example.com"));
    }

    #[test]
    fn validity_window_uses_skew_and_lifetime() {
        let (idp, mut sp, request, endpoint) = fixtures();
        sp.assertion_lifetime = Some(Duration::seconds(60));
        let store = InMemoryAssociationStore::new();

        let before = Utc::now();
        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &AuthnState::new("user1"),
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap();
        let conditions = assertion.conditions.as_ref().unwrap();

        let not_before = conditions.not_before.unwrap();
        let not_on_or_after = conditions.not_on_or_after.unwrap();
        assert!(not_before <= before - Duration::seconds(29));
        assert!((not_on_or_after - not_before).num_seconds() <= 91);
    }

    #[test]
    fn context_priority_explicit_then_proxy_then_scheme() {
        let (mut idp, _sp, _request, _endpoint) = fixtures();

        let mut authn = AuthnState::new("user1");
        authn.proxied_context_class_ref = Some("urn:proxy:ctx".to_string());

        // Proxy value ignored unless proxy mode is on.
        let https = RequestContext {
            https: true,
            ..RequestContext::default()
        };
        assert_eq!(
            authn_context_class(&idp, &authn, &https),
            AuthnContextClass::PasswordProtectedTransport.uri()
        );

        idp.proxy_mode = true;
        assert_eq!(authn_context_class(&idp, &authn, &https), "urn:proxy:ctx");

        authn.context_class_ref = Some("urn:explicit:ctx".to_string());
        assert_eq!(authn_context_class(&idp, &authn, &https), "urn:explicit:ctx");

        // Plain HTTP defaults to Password.
        let authn = AuthnState::new("user1");
        assert_eq!(
            authn_context_class(&idp, &authn, &RequestContext::default()),
            AuthnContextClass::Password.uri()
        );
    }

    #[test]
    fn holder_of_key_requires_client_certificate() {
        let (mut idp, sp, request, _) = fixtures();
        idp.holder_of_key = true;
        let endpoint = Endpoint::new("https://sp.example.com/hok-acs", SamlBinding::HokSso);
        let store = InMemoryAssociationStore::new();

        let err = build_assertion(
            &idp,
            &sp,
            &request,
            &AuthnState::new("user1"),
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap_err();
        assert!(matches!(err, SamlError::MissingClientCertificate));

        let context = RequestContext {
            https: true,
            client_certificate_der: Some(vec![0x30, 0x82]),
        };
        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &AuthnState::new("user1"),
            &endpoint,
            &context,
            &store,
        )
        .unwrap();
        let confirmation = &assertion.subject.as_ref().unwrap().confirmations[0];
        assert!(confirmation.method.contains("holder-of-key"));
        assert!(confirmation
            .data
            .as_ref()
            .unwrap()
            .holder_certificate
            .is_some());
    }

    #[test]
    fn attribute_encodings_are_applied() {
        let (idp, mut sp, request, endpoint) = fixtures();
        sp.attribute_encodings
            .insert("photo".to_string(), AttributeEncoding::Base64);
        sp.attribute_encodings
            .insert("cert".to_string(), AttributeEncoding::RawXml);
        let store = InMemoryAssociationStore::new();

        let authn = AuthnState::new("user1")
            .with_attribute("mail", ["user@example.com"])
            .with_attribute("photo", ["raw-bytes"])
            .with_attribute("cert", ["<ds:X509Data>abc</ds:X509Data>"]);

        let assertion = build_assertion(
            &idp,
            &sp,
            &request,
            &authn,
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap();

        assert_eq!(
            assertion.attributes[0].values[0],
            AttributeValue::Text("user@example.com".to_string())
        );
        assert_eq!(
            assertion.attributes[1].values[0],
            AttributeValue::Text(BASE64.encode("raw-bytes"))
        );
        assert!(matches!(
            assertion.attributes[2].values[0],
            AttributeValue::Fragment(_)
        ));
    }

    #[test]
    fn malformed_raw_xml_attribute_fails() {
        let (idp, mut sp, request, endpoint) = fixtures();
        sp.attribute_encodings
            .insert("cert".to_string(), AttributeEncoding::RawXml);
        let store = InMemoryAssociationStore::new();

        let authn = AuthnState::new("user1").with_attribute("cert", ["<unclosed"]);
        let err = build_assertion(
            &idp,
            &sp,
            &request,
            &authn,
            &endpoint,
            &RequestContext::default(),
            &store,
        )
        .unwrap_err();
        assert!(matches!(err, SamlError::UnsupportedAttributeEncoding(_)));
    }
}
