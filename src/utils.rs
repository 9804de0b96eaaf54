//! # Decoding and Comparison Utilities
//!
//! The lenient payload decoder for IdP callbacks (base64, optionally
//! URL-safe, optionally deflate-compressed for the HTTP-Redirect binding),
//! SAML timestamp parsing, and the URI-equivalence comparison used by the
//! destination and issuer validations.

use std::io::Read;

use base64::engine::general_purpose::{
    STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::read::DeflateDecoder;
use url::Url;

use crate::error::{SamlError, SamlResult};

/// Decode a SAML payload as received on the wire. Whitespace is stripped,
/// base64 variants are tried in turn, and a deflate pass recovers
/// HTTP-Redirect payloads. Raw XML input is passed through untouched.
pub fn decode_raw_saml(input: &str) -> SamlResult<String> {
    let trimmed = input.trim();
    if trimmed.starts_with('<') {
        return Ok(trimmed.to_string());
    }

    let compact: String = trimmed.split_whitespace().collect();
    let decoded = decode_base64_forgiving(&compact).ok_or_else(|| {
        SamlError::MalformedInput("payload is not valid base64".to_string())
    })?;

    if looks_like_xml(&decoded) {
        return String::from_utf8(decoded)
            .map_err(|e| SamlError::MalformedInput(format!("payload is not UTF-8: {}", e)));
    }

    let mut inflated = String::new();
    let mut decoder = DeflateDecoder::new(decoded.as_slice());
    if decoder.read_to_string(&mut inflated).is_ok() && inflated.trim_start().starts_with('<')
    {
        return Ok(inflated);
    }

    String::from_utf8(decoded)
        .map_err(|_| SamlError::MalformedInput("payload decodes to neither XML nor deflate data".to_string()))
}

fn decode_base64_forgiving(input: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(input)
        .or_else(|_| STANDARD_NO_PAD.decode(input))
        .or_else(|_| URL_SAFE.decode(input))
        .or_else(|_| URL_SAFE_NO_PAD.decode(input))
        .ok()
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|&b| b == b'<')
        .unwrap_or(false)
}

/// Parse a SAML UTC timestamp (ISO-8601, fractional seconds optional)
pub fn parse_saml_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render a timestamp the way SAML messages carry them
pub fn format_saml_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// URI equivalence: exact string equality, or equality after normalizing
/// scheme and host case, default ports, and a trailing slash on the path
pub fn uris_match(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    match (Url::parse(left), Url::parse(right)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
                && normalize_path(a.path()) == normalize_path(b.path())
                && a.query() == b.query()
        }
        _ => false,
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.strip_suffix('/').unwrap_or(path);
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    const XML: &str = "<samlp:Response ID=\"_x\"/>";

    #[test]
    fn test_decode_plain_base64() {
        let encoded = STANDARD.encode(XML);
        assert_eq!(decode_raw_saml(&encoded).unwrap(), XML);
    }

    #[test]
    fn test_decode_with_embedded_whitespace() {
        let encoded = STANDARD.encode(XML);
        let wrapped = format!("{}\n{}", &encoded[..10], &encoded[10..]);
        assert_eq!(decode_raw_saml(&wrapped).unwrap(), XML);
    }

    #[test]
    fn test_decode_deflated_redirect_binding() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(XML.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        let encoded = STANDARD.encode(compressed);
        assert_eq!(decode_raw_saml(&encoded).unwrap(), XML);
    }

    #[test]
    fn test_decode_url_safe_base64() {
        // Force bytes whose base64 contains '-'/'_' by deflating first.
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(XML.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        let encoded = base64::engine::general_purpose::URL_SAFE.encode(compressed);
        assert_eq!(decode_raw_saml(&encoded).unwrap(), XML);
    }

    #[test]
    fn test_raw_xml_passthrough() {
        assert_eq!(decode_raw_saml(XML).unwrap(), XML);
    }

    #[test]
    fn test_reject_garbage() {
        assert!(decode_raw_saml("%%%not-base64%%%").is_err());
    }

    #[test]
    fn test_timestamp_parsing() {
        let t = parse_saml_timestamp("2024-06-01T12:30:00Z").unwrap();
        assert_eq!(format_saml_timestamp(t), "2024-06-01T12:30:00Z");
        assert!(parse_saml_timestamp("2024-06-01T12:30:00.123Z").is_some());
        assert!(parse_saml_timestamp("2024-06-01T14:30:00+02:00").is_some());
        assert!(parse_saml_timestamp("junk").is_none());
    }

    #[test]
    fn test_uri_match_normalization() {
        assert!(uris_match(
            "https://sp.example.com/acs",
            "HTTPS://SP.EXAMPLE.COM:443/acs/"
        ));
        assert!(uris_match("https://sp.example.com", "https://sp.example.com/"));
        assert!(!uris_match(
            "https://sp.example.com/acs",
            "https://sp.example.com/other"
        ));
        assert!(!uris_match(
            "http://sp.example.com/acs",
            "https://sp.example.com/acs"
        ));
        // Non-URL identifiers still match exactly.
        assert!(uris_match("urn:example:sp", "urn:example:sp"));
    }
}
