//! Server side of the opening handshake.

use std::io::Write;

use http::{
    response::Builder, HeaderMap, Request as HttpRequest, Response as HttpResponse, StatusCode,
};
use httparse::Status;
use log::*;

use super::{derive_accept_key, header_contains_token, parse_query, MAX_HEADERS};
use crate::error::{Error, ProtocolError, Result};

/// Server request type.
pub type Request = HttpRequest<()>;

/// Server response type.
pub type Response = HttpResponse<()>;

/// Try to parse an HTTP request from the start of `buf`.
///
/// Returns the number of bytes the request occupied, or `None` if the header
/// block is not complete yet.
pub fn parse_request(buf: &[u8]) -> Result<Option<(usize, Request)>> {
    let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut hbuffer);
    Ok(match req.parse(buf)? {
        Status::Partial => None,
        Status::Complete(size) => Some((size, request_from_httparse(req)?)),
    })
}

fn request_from_httparse(raw: httparse::Request<'_, '_>) -> Result<Request> {
    if raw.method != Some("GET") {
        return Err(Error::Protocol(ProtocolError::WrongHttpMethod));
    }

    if raw.version != Some(1) {
        return Err(Error::Protocol(ProtocolError::WrongHttpVersion));
    }

    let path = raw.path.ok_or(Error::Protocol(ProtocolError::HandshakeIncomplete))?;

    let mut request = HttpRequest::get(path);
    if let Some(headers) = request.headers_mut() {
        *headers = headers_from_httparse(raw.headers)?;
    }
    let mut request = request.body(())?;
    *request.version_mut() = http::Version::HTTP_11;

    Ok(request)
}

fn headers_from_httparse(raw: &[httparse::Header<'_>]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for h in raw {
        headers.append(
            http::header::HeaderName::from_bytes(h.name.as_bytes())?,
            http::HeaderValue::from_bytes(h.value)?,
        );
    }
    Ok(headers)
}

/// Check that `request` is a well-formed WebSocket Upgrade request.
pub fn validate_request(request: &Request) -> Result<()> {
    if request.method() != http::Method::GET {
        return Err(Error::Protocol(ProtocolError::WrongHttpMethod));
    }

    if request.version() < http::Version::HTTP_11 {
        return Err(Error::Protocol(ProtocolError::WrongHttpVersion));
    }

    if !header_contains_token(request.headers(), "Connection", "Upgrade") {
        return Err(Error::Protocol(ProtocolError::MissingConnectionUpgradeHeader));
    }

    if !header_contains_token(request.headers(), "Upgrade", "websocket") {
        return Err(Error::Protocol(ProtocolError::MissingUpgradeWebSocketHeader));
    }

    if !request.headers().get("Sec-WebSocket-Version").map(|h| h == "13").unwrap_or(false) {
        return Err(Error::Protocol(ProtocolError::MissingSecWebSocketVersionHeader));
    }

    if request.headers().get("Sec-WebSocket-Key").is_none() {
        return Err(Error::Protocol(ProtocolError::MissingSecWebSocketKey));
    }

    Ok(())
}

/// Create a `101 Switching Protocols` response for a validated request.
pub fn create_response(request: &Request) -> Result<Response> {
    validate_request(request)?;

    let key = request
        .headers()
        .get("Sec-WebSocket-Key")
        .ok_or(Error::Protocol(ProtocolError::MissingSecWebSocketKey))?;

    let builder = Builder::new()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .version(request.version())
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Accept", derive_accept_key(key.as_bytes()));

    Ok(builder.body(())?)
}

/// Serialize a response head, including the blank line that ends it.
pub fn write_response<T>(mut w: impl Write, response: &HttpResponse<T>) -> Result<()> {
    writeln!(
        w,
        "{version:?} {status}\r",
        version = response.version(),
        status = response.status()
    )?;

    for (k, v) in response.headers() {
        writeln!(w, "{}: {}\r", k, v.to_str()?)?;
    }

    writeln!(w, "\r")?;

    Ok(())
}

/// Everything a session keeps from the Upgrade request it was created for.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    target: String,
    query: Vec<(String, String)>,
    response: Vec<u8>,
}

impl UpgradeRequest {
    /// Validate `request` and prepare the response the session will send.
    pub fn new(request: &Request) -> Result<Self> {
        let response = create_response(request)?;
        let mut head = Vec::new();
        write_response(&mut head, &response)?;

        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| request.uri().to_string());
        if !target.starts_with('/') {
            return Err(Error::Url(format!("no path in request target {target:?}")));
        }
        debug!("Accepted upgrade request for {target}");

        Ok(UpgradeRequest { query: parse_query(&target), target, response: head })
    }

    /// The request target: path plus query, as sent by the client.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The request path without the query.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    /// Decoded query parameters, in request order.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// The serialized `101 Switching Protocols` response head.
    pub fn response_bytes(&self) -> &[u8] {
        &self.response
    }
}
