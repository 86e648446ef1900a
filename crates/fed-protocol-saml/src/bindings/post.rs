//! HTTP-POST binding.
//!
//! The serialized (possibly signed) message is base64-encoded and carried
//! in a self-submitting HTML form, together with the relay state as a
//! hidden field.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{SamlError, SamlResult};

use super::{DecodedMessage, SamlMessageType, TransportAction};

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Encodes an outbound message as a self-submitting form.
    #[must_use]
    pub fn send(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> TransportAction {
        let encoded = BASE64.encode(xml);
        let param_name = message_type.param();

        let relay_state_input = relay_state
            .map(|rs| {
                format!(
                    r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                    html_escape(rs)
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
            html_escape(destination),
            param_name,
            encoded,
            relay_state_input
        );

        TransportAction::PostForm { html }
    }

    /// Decodes a message from HTTP-POST form fields.
    pub fn receive(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<DecodedMessage> {
        let (encoded, message_type) = if let Some(req) = saml_request {
            (req, SamlMessageType::Request)
        } else if let Some(resp) = saml_response {
            (resp, SamlMessageType::Response)
        } else {
            return Err(SamlError::InvalidRequest(
                "no SAMLRequest or SAMLResponse parameter".to_string(),
            ));
        };

        let decoded = BASE64.decode(encoded)?;
        let xml = String::from_utf8(decoded)
            .map_err(|e| SamlError::InvalidRequest(format!("invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
            signature: None,
            sig_alg: None,
        })
    }
}

/// Escapes HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_value(html: &str, name: &str) -> String {
        let marker = format!("name=\"{name}\" value=\"");
        let start = html.find(&marker).unwrap() + marker.len();
        let end = html[start..].find('"').unwrap();
        html[start..start + end].to_string()
    }

    #[test]
    fn send_and_receive_request() {
        let xml = r#"<samlp:AuthnRequest ID="_1">x</samlp:AuthnRequest>"#;
        let TransportAction::PostForm { html } = HttpPostBinding::send(
            xml,
            "https://idp.example.com/sso",
            Some("state123"),
            SamlMessageType::Request,
        ) else {
            panic!("POST binding must produce a form");
        };

        assert!(html.contains("https://idp.example.com/sso"));
        assert!(html.contains("RelayState"));

        let encoded = form_value(&html, "SAMLRequest");
        let decoded = HttpPostBinding::receive(Some(&encoded), None, Some("state123")).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.message_type, SamlMessageType::Request);
        assert_eq!(decoded.relay_state.as_deref(), Some("state123"));
    }

    #[test]
    fn response_uses_response_field() {
        let TransportAction::PostForm { html } = HttpPostBinding::send(
            "<samlp:Response/>",
            "https://sp.example.com/acs",
            None,
            SamlMessageType::Response,
        ) else {
            panic!("POST binding must produce a form");
        };
        assert!(html.contains("SAMLResponse"));
        assert!(!html.contains("RelayState"));
    }

    #[test]
    fn receive_without_message_fails() {
        assert!(HttpPostBinding::receive(None, None, None).is_err());
    }

    #[test]
    fn destination_is_escaped() {
        let TransportAction::PostForm { html } = HttpPostBinding::send(
            "<x/>",
            r#"https://sp.example.com/acs?a="b""#,
            None,
            SamlMessageType::Response,
        ) else {
            panic!("POST binding must produce a form");
        };
        assert!(html.contains("&quot;b&quot;"));
    }
}
