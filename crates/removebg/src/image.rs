//! Image payload helpers
//!
//! The browser sends signatures as `data:<mime>;base64,<payload>` strings and
//! expects the processed image back in the same shape.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::{Error, Result};

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Bytes,
}

/// Decode a base64 `data:` URL. A bare base64 string is accepted as PNG.
pub fn parse_data_url(input: &str) -> Result<DataUrl> {
    let input = input.trim();
    let (mime, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| Error::InvalidDataUrl("missing ',' separator".into()))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| Error::InvalidDataUrl("only base64 payloads are supported".into()))?;
            let mime = if mime.is_empty() {
                "application/octet-stream"
            } else {
                mime
            };
            (mime.to_string(), payload)
        }
        None => ("image/png".to_string(), input),
    };

    let bytes = STANDARD.decode(payload.trim())?;
    if bytes.is_empty() {
        return Err(Error::EmptyImage);
    }
    Ok(DataUrl {
        mime,
        bytes: Bytes::from(bytes),
    })
}

/// Encode bytes as a base64 `data:` URL.
pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Identify an image by its magic bytes. `None` for anything else.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) const TINY_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_png_data_url() {
        let url = to_data_url("image/png", TINY_PNG);
        assert!(url.starts_with("data:image/png;base64,"));

        let parsed = parse_data_url(&url).unwrap();
        assert_eq!(parsed.mime, "image/png");
        assert_eq!(&parsed.bytes[..], TINY_PNG);
    }

    #[test]
    fn bare_base64_defaults_to_png() {
        let parsed = parse_data_url(&STANDARD.encode(TINY_PNG)).unwrap();
        assert_eq!(parsed.mime, "image/png");
    }

    #[test]
    fn rejects_non_base64_data_url() {
        let err = parse_data_url("data:text/plain,hello").unwrap_err();
        assert!(matches!(err, Error::InvalidDataUrl(_)));
    }

    #[test]
    fn rejects_missing_separator() {
        let err = parse_data_url("data:image/png;base64").unwrap_err();
        assert!(matches!(err, Error::InvalidDataUrl(_)));
    }

    #[test]
    fn rejects_garbage_payload() {
        let err = parse_data_url("data:image/png;base64,@@not base64@@").unwrap_err();
        assert!(matches!(err, Error::Base64(_)));
    }

    #[test]
    fn rejects_empty_payload() {
        let err = parse_data_url("data:image/png;base64,").unwrap_err();
        assert!(matches!(err, Error::EmptyImage));
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_mime(TINY_PNG), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"{\"errors\":[]}"), None);
        assert_eq!(sniff_mime(b""), None);
    }
}
