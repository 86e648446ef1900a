//! End-to-end IdP flows: SSO over POST and Artifact, suspend/resume, and
//! logout fan-out.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;

use fed_protocol_saml::bindings::{
    Artifact, DecodedMessage, HttpPostBinding, InMemoryArtifactStore, SamlMessageType,
    SoapEnvelope, TransportAction,
};
use fed_protocol_saml::idp::{
    handle_artifact_resolve, Association, AssociationStore, AuthnState, Endpoint, IdpConfig,
    InMemoryAssociationStore, InMemoryFlowStateStore, InMemoryMetadataProvider, LogoutHandler,
    RequestContext, SpConfig, SsoHandler, SsoOutcome,
};
use fed_protocol_saml::signature::{SignedElement, VerificationKey};
use fed_protocol_saml::types::{
    sub_status_codes, AuthnRequest, LogoutRequest, LogoutResponse, NameId, Response, SamlBinding,
};

const METADATA_SET: &str = "default-sp";

fn idp_keypair() -> (Vec<u8>, VerificationKey) {
    let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let private = key.to_pkcs8_der().unwrap().as_bytes().to_vec();
    let public = key
        .to_public_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    (private, VerificationKey::from_spki_der(public))
}

fn form_value(html: &str, name: &str) -> String {
    let marker = format!("name=\"{name}\" value=\"");
    let start = html.find(&marker).expect("form field present") + marker.len();
    let end = html[start..].find('"').unwrap();
    html[start..start + end].to_string()
}

fn sp_with_sole_post_acs() -> SpConfig {
    SpConfig {
        acs_endpoints: vec![Endpoint::new(
            "https://sp.example/acs",
            SamlBinding::HttpPost,
        )],
        ..SpConfig::new("https://sp.example")
    }
}

#[test]
fn sso_end_to_end_over_post() {
    let (signing_key, idp_public) = idp_keypair();
    let idp = IdpConfig::new("https://idp.example.com", signing_key, Vec::new());

    let mut metadata = InMemoryMetadataProvider::new();
    metadata.insert(METADATA_SET, sp_with_sole_post_acs());
    let associations = InMemoryAssociationStore::new();
    let artifacts = InMemoryArtifactStore::new();
    let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

    // SP-initiated request with no ACS constraints, over the POST binding.
    let authn_request = AuthnRequest::new("https://sp.example");
    let TransportAction::PostForm { html } = HttpPostBinding::send(
        &authn_request.to_xml(),
        "https://idp.example.com/sso",
        Some("app-state"),
        SamlMessageType::Request,
    ) else {
        panic!("POST binding must render a form");
    };
    let decoded = HttpPostBinding::receive(
        Some(&form_value(&html, "SAMLRequest")),
        None,
        Some(&form_value(&html, "RelayState")),
    )
    .unwrap();

    let authn = AuthnState::new("user1").with_attribute("mail", ["user@example.com"]);
    let context = RequestContext {
        https: true,
        client_certificate_der: None,
    };
    let before = Utc::now();
    let outcome = handler
        .process(METADATA_SET, &decoded, Some(&authn), &context)
        .unwrap();
    let SsoOutcome::Deliver(TransportAction::PostForm { html }) = outcome else {
        panic!("expected a POST form delivery");
    };

    // The sole metadata endpoint was selected.
    assert!(html.contains(r#"action="https://sp.example/acs""#));

    // Relay state is echoed back unchanged.
    assert_eq!(form_value(&html, "RelayState"), "app-state");

    let response_xml =
        String::from_utf8(BASE64.decode(form_value(&html, "SAMLResponse")).unwrap()).unwrap();
    let response = Response::parse(&response_xml).unwrap();

    assert!(response.is_success());
    assert_eq!(response.in_response_to.as_deref(), Some(authn_request.id.as_str()));
    assert_eq!(response.destination.as_deref(), Some("https://sp.example/acs"));

    // The response is signed by the IdP.
    assert!(response.validate_signature(&idp_public).unwrap());

    let assertion = response.first_assertion().unwrap();
    assert_eq!(assertion.issuer, "https://idp.example.com");
    let conditions = assertion.conditions.as_ref().unwrap();
    assert!(conditions.permits_audience("https://sp.example"));

    // NotOnOrAfter = now + 300s (the IdP default lifetime).
    let not_on_or_after = conditions.not_on_or_after.unwrap();
    let lifetime = (not_on_or_after - before).num_seconds();
    assert!((295..=305).contains(&lifetime), "lifetime was {lifetime}s");

    // Subject is confirmed as Bearer at the selected endpoint.
    let confirmation = &assertion.subject.as_ref().unwrap().confirmations[0];
    assert!(confirmation.method.ends_with("bearer"));
    assert_eq!(
        confirmation.data.as_ref().unwrap().recipient.as_deref(),
        Some("https://sp.example/acs")
    );

    assert_eq!(assertion.attributes[0].name, "mail");
    assert_eq!(
        assertion.attributes[0].text_values(),
        vec!["user@example.com".to_string()]
    );
}

#[test]
fn tampered_response_fails_signature_validation() {
    let (signing_key, idp_public) = idp_keypair();
    let idp = IdpConfig::new("https://idp.example.com", signing_key, Vec::new());

    let mut metadata = InMemoryMetadataProvider::new();
    metadata.insert(METADATA_SET, sp_with_sole_post_acs());
    let associations = InMemoryAssociationStore::new();
    let artifacts = InMemoryArtifactStore::new();
    let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

    let request = AuthnRequest::new("https://sp.example");
    let action = handler
        .respond(
            METADATA_SET,
            &request,
            &AuthnState::new("user1"),
            &RequestContext::default(),
        )
        .unwrap();
    let TransportAction::PostForm { html } = action else {
        panic!("expected a POST form delivery");
    };
    let response_xml =
        String::from_utf8(BASE64.decode(form_value(&html, "SAMLResponse")).unwrap()).unwrap();

    // Single byte flip in the signed content: validation must fail with an
    // error, never return false or true.
    let tampered = response_xml.replace("https://idp.example.com", "https://idq.example.com");
    let response = Response::parse(&tampered).unwrap();
    assert!(response.validate_signature(&idp_public).is_err());

    // The untampered response still validates.
    let response = Response::parse(&response_xml).unwrap();
    assert!(response.validate_signature(&idp_public).unwrap());
}

#[test]
fn sso_suspend_and_resume() {
    let (signing_key, _) = idp_keypair();
    let idp = IdpConfig::new("https://idp.example.com", signing_key, Vec::new());

    let mut metadata = InMemoryMetadataProvider::new();
    metadata.insert(METADATA_SET, sp_with_sole_post_acs());
    let associations = InMemoryAssociationStore::new();
    let artifacts = InMemoryArtifactStore::new();
    let flow_store = InMemoryFlowStateStore::new();
    let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

    let request = AuthnRequest::new("https://sp.example");
    let decoded = DecodedMessage {
        xml: request.to_xml(),
        message_type: SamlMessageType::Request,
        relay_state: Some("rs-1".to_string()),
        signature: None,
        sig_alg: None,
    };

    // No session yet: the flow suspends under the authn stage tag.
    let outcome = handler
        .process(METADATA_SET, &decoded, None, &RequestContext::default())
        .unwrap();
    let SsoOutcome::AuthenticationRequired(cursor) = outcome else {
        panic!("expected suspension");
    };
    let token = handler.suspend(&flow_store, &cursor).unwrap();

    // Authentication happened elsewhere; resume under the same stage tag.
    let action = handler
        .resume(
            &flow_store,
            &token,
            METADATA_SET,
            &AuthnState::new("user1"),
            &RequestContext::default(),
        )
        .unwrap();
    let TransportAction::PostForm { html } = action else {
        panic!("expected a POST form delivery");
    };
    assert_eq!(form_value(&html, "RelayState"), "rs-1");

    let response_xml =
        String::from_utf8(BASE64.decode(form_value(&html, "SAMLResponse")).unwrap()).unwrap();
    let response = Response::parse(&response_xml).unwrap();
    assert_eq!(response.in_response_to.as_deref(), Some(request.id.as_str()));
}

#[test]
fn sso_over_artifact_stores_and_resolves() {
    let (signing_key, _) = idp_keypair();
    let idp = IdpConfig::new("https://idp.example.com", signing_key, Vec::new());

    let sp = SpConfig {
        acs_endpoints: vec![Endpoint::new(
            "https://sp.example/artifact-acs",
            SamlBinding::HttpArtifact,
        )],
        ..SpConfig::new("https://sp.example")
    };
    let mut metadata = InMemoryMetadataProvider::new();
    metadata.insert(METADATA_SET, sp);
    let associations = InMemoryAssociationStore::new();
    let artifacts = InMemoryArtifactStore::new();
    let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

    let request = AuthnRequest::new("https://sp.example");
    let action = handler
        .respond(
            METADATA_SET,
            &request,
            &AuthnState::new("user1"),
            &RequestContext::default(),
        )
        .unwrap();

    // The front channel carries only the artifact reference.
    let TransportAction::Redirect { url } = action else {
        panic!("artifact binding must redirect");
    };
    assert!(url.starts_with("https://sp.example/artifact-acs?SAMLart="));
    assert!(!url.contains("SAMLResponse"));

    let artifact = url::Url::parse(&url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "SAMLart")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // Back-channel resolution over SOAP returns the stored response.
    let resolve_xml = format!(
        r#"<samlp:ArtifactResolve xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resolve1" Version="2.0" IssueInstant="2026-01-01T00:00:00Z"><saml:Issuer>https://sp.example</saml:Issuer><samlp:Artifact>{artifact}</samlp:Artifact></samlp:ArtifactResolve>"#
    );
    let TransportAction::SoapEnvelope { xml } =
        handle_artifact_resolve(&idp, &artifacts, &resolve_xml).unwrap()
    else {
        panic!("artifact resolution answers over SOAP");
    };

    let body = SoapEnvelope::unwrap(&xml).unwrap();
    assert_eq!(body.local_name(), "ArtifactResponse");
    assert_eq!(body.attr("InResponseTo"), Some("_resolve1"));

    // A second resolution of the same artifact finds nothing.
    assert!(handle_artifact_resolve(&idp, &artifacts, &resolve_xml).is_err());
}

#[test]
fn idp_initiated_sso_has_no_in_response_to() {
    let (signing_key, idp_public) = idp_keypair();
    let idp = IdpConfig::new("https://idp.example.com", signing_key, Vec::new());

    let mut metadata = InMemoryMetadataProvider::new();
    metadata.insert(METADATA_SET, sp_with_sole_post_acs());
    let associations = InMemoryAssociationStore::new();
    let artifacts = InMemoryArtifactStore::new();
    let handler = SsoHandler::new(&idp, &metadata, &associations, &artifacts);

    let action = handler
        .initiate(
            METADATA_SET,
            "https://sp.example",
            Some("target-page"),
            &AuthnState::new("user1"),
            &RequestContext { https: true, client_certificate_der: None },
        )
        .unwrap();
    let TransportAction::PostForm { html } = action else {
        panic!("expected a POST form delivery");
    };
    assert_eq!(form_value(&html, "RelayState"), "target-page");

    let response_xml =
        String::from_utf8(BASE64.decode(form_value(&html, "SAMLResponse")).unwrap()).unwrap();
    let response = Response::parse(&response_xml).unwrap();
    assert!(response.in_response_to.is_none());
    assert!(response.validate_signature(&idp_public).unwrap());

    let confirmation = &response.first_assertion().unwrap().subject.as_ref().unwrap().confirmations[0];
    assert!(confirmation.data.as_ref().unwrap().in_response_to.is_none());
}

#[test]
fn ten_thousand_artifacts_are_pairwise_distinct() {
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        assert!(seen.insert(Artifact::generate("https://idp.example.com", 0).encode()));
    }
}

#[test]
fn partial_logout_scenario() {
    let (signing_key, _) = idp_keypair();
    let mut idp = IdpConfig::new("https://idp.example.com", signing_key, Vec::new());
    idp.sign_response = false;

    let mut metadata = InMemoryMetadataProvider::new();
    for name in [
        "https://initiator.example",
        "https://sp1.example",
        "https://sp2.example",
    ] {
        metadata.insert(
            METADATA_SET,
            SpConfig {
                slo_endpoints: vec![Endpoint::new(
                    format!("{name}/slo"),
                    SamlBinding::HttpRedirect,
                )],
                ..SpConfig::new(name)
            },
        );
    }

    let associations = InMemoryAssociationStore::new();
    for (i, name) in [
        "https://initiator.example",
        "https://sp1.example",
        "https://sp2.example",
    ]
    .iter()
    .enumerate()
    {
        associations
            .add(
                "user1",
                Association {
                    sp_entity_id: (*name).to_string(),
                    name_id: NameId::transient(format!("_t{i}")),
                    session_index: format!("_s{i}"),
                },
            )
            .unwrap();
    }

    let handler = LogoutHandler::new(&idp, &metadata, &associations);
    let initiator = LogoutRequest::new("https://initiator.example", NameId::transient("_t0"))
        .with_session_index("_s0");

    // SP1's delivery fails with a network error; SP2 succeeds.
    let mut delivered = Vec::new();
    let action = handler
        .fan_out(METADATA_SET, "user1", &initiator, |dispatch| {
            if dispatch.sp_entity_id == "https://sp1.example" {
                Err(fed_protocol_saml::SamlError::SoapTransport(
                    "connection reset".to_string(),
                ))
            } else {
                delivered.push(dispatch.sp_entity_id.clone());
                Ok(())
            }
        })
        .unwrap();

    assert_eq!(delivered, vec!["https://sp2.example".to_string()]);

    // The initiator still gets Success, qualified by PartialLogout.
    let TransportAction::Redirect { url } = action else {
        panic!("redirect SLO endpoint should redirect");
    };
    let decoded = fed_protocol_saml::bindings::HttpRedirectBinding::receive_url(&url).unwrap();
    let response = LogoutResponse::parse(&decoded.xml).unwrap();
    assert!(response.is_success());
    assert_eq!(
        response.status.status_code.sub_status_value(),
        Some(sub_status_codes::PARTIAL_LOGOUT)
    );
    assert_eq!(
        response.in_response_to.as_deref(),
        Some(initiator.id.as_str())
    );
}
