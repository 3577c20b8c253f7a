//! HTTP Upgrade handshake
//!
//! Turns the first bytes a client sends into a `101 Switching Protocols`
//! response. Only the presence of `Sec-WebSocket-Key` is checked; there is
//! no Origin or sub-protocol negotiation.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing (RFC 6455)
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key";

/// Handshake errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}

/// Extract the `Sec-WebSocket-Key` value from a raw HTTP request
pub fn extract_key(request: &[u8]) -> Result<String, HandshakeError> {
    let text = String::from_utf8_lossy(request);

    text.split("\r\n")
        .skip(1)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(KEY_HEADER))
        .map(|(_, value)| value.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// Compute `base64(SHA-1(key + GUID))`
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response for a request
///
/// Fails if the request carries no key; the caller closes the connection
/// without writing anything.
pub fn respond(request: &[u8]) -> Result<String, HandshakeError> {
    let key = extract_key(request)?;
    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_token(&key)
    ))
}
