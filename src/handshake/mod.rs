//! WebSocket opening handshake: the HTTP Upgrade request and its response.

pub mod server;

use data_encoding::BASE64;
use http::HeaderMap;
use sha1::{Digest, Sha1};

/// Limit for the number of header lines.
pub(crate) const MAX_HEADERS: usize = 124;

/// Turns a Sec-WebSocket-Key into a Sec-WebSocket-Accept.
pub fn derive_accept_key(request_key: &[u8]) -> String {
    // ... field is constructed by concatenating /key/ ...
    // ... with the string "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(request_key);
    sha1.update(WS_GUID);
    BASE64.encode(&sha1.finalize())
}

/// Generate a random key for the `Sec-WebSocket-Key` header.
pub fn generate_key() -> String {
    // a base64-encoded (see Section 4 of [RFC4648]) value that,
    // when decoded, is 16 bytes in length (RFC 6455)
    let r: [u8; 16] = rand::random();
    BASE64.encode(&r)
}

/// Check whether any comma-separated token of header `name` equals `token`,
/// ignoring ASCII case. Repeated header lines are all searched.
pub(crate) fn header_contains_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Split the query part of a request target into decoded key/value pairs, in order.
pub fn parse_query(target: &str) -> Vec<(String, String)> {
    let query = match target.split_once('?') {
        Some((_, query)) => query,
        None => return Vec::new(),
    };
    // A fragment never reaches a server, but do not let a stray one leak into values.
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}
