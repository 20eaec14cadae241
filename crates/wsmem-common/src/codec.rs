//! Hex codec for the wire protocol.
//!
//! Memory payloads travel as two hex characters per byte with no separators:
//! uppercase on output, either case accepted on input. A trailing odd nibble
//! is dropped before decoding.

use crate::error::{Error, Result};

/// Encode bytes as uppercase hex, two characters per byte.
pub fn encode(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode a hex string to bytes.
///
/// Case-insensitive. A trailing odd nibble is ignored; any other non-hex
/// character is an error and nothing is decoded.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    if !input.is_ascii() {
        return Err(Error::Hex("non-ascii input".to_string()));
    }
    let even = input.len() & !1;
    Ok(hex::decode(&input[..even])?)
}
