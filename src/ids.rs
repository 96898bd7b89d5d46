//! Action and object identifiers
//!
//! IDs travel as raw bytes on the stdio protocol and as lowercase hex on disk
//! and over HTTP. Anything hex that arrives from outside the process is
//! checked here before it is allowed near a filesystem path.

use crate::error::{ProxyError, ProxyResult};

/// Shortest hex ID accepted on the HTTP surface
pub const MIN_HEX_LEN: usize = 4;

/// Longest hex ID accepted on the HTTP surface
pub const MAX_HEX_LEN: usize = 1000;

/// Encode raw ID bytes as lowercase hex
pub fn encode(id: &[u8]) -> String {
    hex::encode(id)
}

/// Decode a hex ID read from disk or from a remote peer
pub fn decode(what: &'static str, value: &str) -> ProxyResult<Vec<u8>> {
    hex::decode(value).map_err(|_| ProxyError::InvalidHex {
        what,
        value: value.to_string(),
    })
}

/// Check that a string is non-empty, even-length lowercase hex
pub fn is_hex(value: &str) -> bool {
    !value.is_empty()
        && value.len() % 2 == 0
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Check an ID taken from a request path.
///
/// Accepts even-length lowercase hex between `MIN_HEX_LEN` and `MAX_HEX_LEN`
/// characters.
pub fn is_valid_hex(value: &str) -> bool {
    (MIN_HEX_LEN..=MAX_HEX_LEN).contains(&value.len()) && is_hex(value)
}

/// Reject anything that is not usable as a file name component
pub fn ensure_hex(what: &'static str, value: &str) -> ProxyResult<()> {
    if is_hex(value) {
        Ok(())
    } else {
        Err(ProxyError::InvalidHex {
            what,
            value: value.to_string(),
        })
    }
}
