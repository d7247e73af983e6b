//! Percent-encoding for form bodies.
//!
//! `encode` escapes everything outside the RFC 3986 unreserved set.
//! `decode` follows the `application/x-www-form-urlencoded` convention rather
//! than generic URI decoding: a literal `+` becomes a space. Escapes that are
//! not followed by two hex digits are kept as-is.

use std::borrow::Cow;

/// Percent-encode `input`, using upper-case hex digits.
pub fn encode(input: &[u8]) -> String {
    urlencoding::encode_binary(input).into_owned()
}

/// Decode `%XX` escapes and `+` (as space).
pub fn decode(input: &str) -> Vec<u8> {
    let spaced = if input.contains('+') {
        Cow::Owned(input.replace('+', " "))
    } else {
        Cow::Borrowed(input)
    };
    urlencoding::decode_binary(spaced.as_bytes()).into_owned()
}

/// Decode into a `String`, replacing invalid UTF-8 sequences.
pub fn decode_to_string(input: &str) -> String {
    String::from_utf8_lossy(&decode(input)).into_owned()
}
