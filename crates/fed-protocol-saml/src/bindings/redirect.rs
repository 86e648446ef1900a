//! HTTP-Redirect binding.
//!
//! Messages are DEFLATE-compressed, base64-encoded and carried as URL
//! query parameters; signatures are detached over the query string.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{SamlError, SamlResult};

use super::{DecodedMessage, SamlMessageType, TransportAction};

/// Decompressed size cap; keeps a hostile payload from inflating without
/// bound.
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes an outbound message as a redirect URL.
    pub fn send(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SamlResult<TransportAction> {
        let compressed = deflate_compress(xml.as_bytes())?;
        let encoded = BASE64.encode(&compressed);

        let separator = if destination.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}{}={}",
            destination,
            separator,
            message_type.param(),
            urlencoding::encode(&encoded)
        );
        if let Some(rs) = relay_state {
            url.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
        }

        Ok(TransportAction::Redirect { url })
    }

    /// Appends a detached signature to an already-encoded redirect URL.
    #[must_use]
    pub fn append_signature(url: String, sig_alg: &str, signature_b64: &str) -> String {
        format!(
            "{url}&SigAlg={}&Signature={}",
            urlencoding::encode(sig_alg),
            urlencoding::encode(signature_b64)
        )
    }

    /// Decodes a message from redirect query parameters.
    pub fn receive(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
        signature: Option<&str>,
        sig_alg: Option<&str>,
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

        let compressed = BASE64.decode(encoded)?;
        let xml_bytes = deflate_decompress(&compressed)?;
        let xml = String::from_utf8(xml_bytes)
            .map_err(|e| SamlError::InvalidRequest(format!("invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
            signature: signature.map(String::from),
            sig_alg: sig_alg.map(String::from),
        })
    }

    /// Decodes a message from a full redirect URL.
    pub fn receive_url(url: &str) -> SamlResult<DecodedMessage> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SamlError::InvalidRequest(format!("invalid URL: {e}")))?;

        let mut saml_request = None;
        let mut saml_response = None;
        let mut relay_state = None;
        let mut signature = None;
        let mut sig_alg = None;

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "SAMLRequest" => saml_request = Some(value.into_owned()),
                "SAMLResponse" => saml_response = Some(value.into_owned()),
                "RelayState" => relay_state = Some(value.into_owned()),
                "Signature" => signature = Some(value.into_owned()),
                "SigAlg" => sig_alg = Some(value.into_owned()),
                _ => {}
            }
        }

        Self::receive(
            saml_request.as_deref(),
            saml_response.as_deref(),
            relay_state.as_deref(),
            signature.as_deref(),
            sig_alg.as_deref(),
        )
    }
}

fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn deflate_decompress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    DeflateDecoder::new(data)
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_end(&mut decompressed)?;
    if decompressed.len() as u64 >= MAX_DECOMPRESSED_SIZE {
        return Err(SamlError::Deflate(
            "decompressed message exceeds the size limit".to_string(),
        ));
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_receive() {
        let xml = r#"<samlp:LogoutRequest ID="_1">content</samlp:LogoutRequest>"#;
        let TransportAction::Redirect { url } = HttpRedirectBinding::send(
            xml,
            "https://sp.example.com/slo",
            Some("rs"),
            SamlMessageType::Request,
        )
        .unwrap() else {
            panic!("redirect binding must produce a redirect");
        };

        assert!(url.starts_with("https://sp.example.com/slo?SAMLRequest="));
        assert!(url.contains("RelayState=rs"));

        let decoded = HttpRedirectBinding::receive_url(&url).unwrap();
        assert_eq!(decoded.xml, xml);
        assert_eq!(decoded.relay_state.as_deref(), Some("rs"));
    }

    #[test]
    fn existing_query_is_preserved() {
        let TransportAction::Redirect { url } = HttpRedirectBinding::send(
            "<x/>",
            "https://sp.example.com/slo?tenant=a",
            None,
            SamlMessageType::Response,
        )
        .unwrap() else {
            panic!("redirect binding must produce a redirect");
        };
        assert!(url.contains("?tenant=a&SAMLResponse="));
    }

    #[test]
    fn signature_parameters_are_appended() {
        let url = HttpRedirectBinding::append_signature(
            "https://x/slo?SAMLRequest=abc".to_string(),
            "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            "c2ln",
        );
        assert!(url.contains("&SigAlg="));
        assert!(url.ends_with("&Signature=c2ln"));
    }

    #[test]
    fn deflate_roundtrip() {
        let compressed = deflate_compress(b"payload").unwrap();
        assert_eq!(deflate_decompress(&compressed).unwrap(), b"payload");
    }
}
