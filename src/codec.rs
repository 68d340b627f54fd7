//! Wire text codec: percent-encoding and terminator detection.
//!
//! Messages travel as percent-encoded UTF-8 so arbitrary text (including
//! non-ASCII) survives the byte-oriented transport. The end of a logical
//! message is marked in-band by the first occurrence of [`TERMINATOR`] in
//! the cumulative decoded text.
//!
//! Decoding is done in two steps with different strictness: the terminator
//! scan and the pending-text view tolerate malformed escapes and partial
//! code points (a fragment may end mid-escape), while the final message is
//! validated strictly once it is complete.

use std::fmt;
use std::str;

/// In-band end-of-message marker.
///
/// Known protocol weakness: the terminator cannot be distinguished from the
/// same substring appearing in payload content, so a payload containing
/// "over" completes the message early. Kept as-is; fixing it would require
/// a framing change on both sides of the wire.
pub const TERMINATOR: &str = "over";

/// Percent-encode text for the wire.
pub fn encode(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// Percent-decode raw wire bytes leniently.
///
/// Malformed escape sequences pass through literally; no UTF-8 validation.
pub fn decode_binary(raw: &[u8]) -> Vec<u8> {
    urlencoding::decode_binary(raw).into_owned()
}

/// Decode accumulated wire bytes into text, replacing invalid UTF-8.
///
/// Used for the in-progress view of a partially received message, where
/// the final bytes may sit mid-escape or mid-code-point.
pub fn decode_lossy(raw: &[u8]) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw)).into_owned()
}

/// Strictly decode a complete message.
pub fn decode(raw: &[u8]) -> Result<String, DecodeError> {
    let bytes = urlencoding::decode_binary(raw);
    match str::from_utf8(&bytes) {
        Ok(text) => Ok(text.to_owned()),
        Err(e) => Err(DecodeError(e)),
    }
}

/// Check whether the decoded form of the accumulated bytes contains the
/// terminator.
///
/// The scan runs over decoded bytes rather than decoded text: the
/// terminator is pure ASCII, so a byte search finds it even when the
/// surrounding bytes are not yet a valid UTF-8 sequence. This also catches
/// a terminator assembled across fragment boundaries or spelled with
/// percent escapes (`%6Fver`).
pub fn has_terminator(raw: &[u8]) -> bool {
    let needle = TERMINATOR.as_bytes();
    urlencoding::decode_binary(raw)
        .windows(needle.len())
        .any(|window| window == needle)
}

/// A complete message whose decoded bytes are not valid UTF-8.
#[derive(Debug)]
pub struct DecodeError(str::Utf8Error);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decoded message is not valid UTF-8: {}", self.0)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for text in [
            "",
            "hello world",
            "plain-ascii_text.~",
            "100% done & dusted",
            "第3个客户端的请求。",
            "snow ☃ and emoji 🦀",
        ] {
            let encoded = encode(text);
            assert!(encoded.is_ascii(), "encoded form must be ASCII: {encoded}");
            assert_eq!(decode(encoded.as_bytes()).unwrap(), text);
        }
    }

    #[test]
    fn test_terminator_detection() {
        assert!(!has_terminator(b""));
        assert!(!has_terminator(b"hello"));
        assert!(has_terminator(b"over"));
        assert!(has_terminator(b"request body over"));
        assert!(has_terminator(b"moreover, it continues"));
    }

    #[test]
    fn test_terminator_in_percent_escapes() {
        // "over" spelled with an escape for 'o'
        assert!(has_terminator(b"%6Fver"));
        // encoded non-ASCII around the terminator
        let encoded = encode("终わりover了");
        assert!(has_terminator(encoded.as_bytes()));
    }

    #[test]
    fn test_malformed_escape_passes_through() {
        assert_eq!(decode_binary(b"100%zz"), b"100%zz");
        assert_eq!(decode(b"100%zz").unwrap(), "100%zz");
    }

    #[test]
    fn test_lossy_view_of_partial_code_point() {
        // first byte of a two-byte UTF-8 sequence, fragment cut short
        let partial = b"ok \xc3";
        let text = decode_lossy(partial);
        assert!(text.starts_with("ok "));
        // strict decode must reject the same bytes
        assert!(decode(partial).is_err());
    }

    #[test]
    fn test_strict_decode_rejects_invalid_utf8() {
        let err = decode(b"%FF%FE").unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }
}
