//! Methods to accept an incoming WebSocket connection on a server.

use std::io::ErrorKind;

use bytes::Buf;
use log::*;

use crate::{
    error::{CapacityError, Error, ProtocolError, Result},
    handshake::server::{parse_request, write_response, UpgradeRequest},
    session::{Session, SessionConfig, SessionHandler},
    stream::Connection,
    ReadBuffer,
};

/// Upper bound on the size of the HTTP request head.
const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// Read the HTTP Upgrade request off `stream` and validate it.
///
/// Returns the request together with any bytes the client already sent past
/// the end of the request head; those belong to the frame stream.
pub fn read_upgrade_request<S: Connection>(stream: &mut S) -> Result<(UpgradeRequest, Vec<u8>)> {
    let mut buf = ReadBuffer::new();
    loop {
        if let Some((size, request)) = parse_request(buf.chunk())? {
            buf.advance(size);
            let upgrade = UpgradeRequest::new(&request)?;
            return Ok((upgrade, buf.into_vec()));
        }

        if buf.remaining() >= MAX_REQUEST_HEAD {
            return Err(Error::Capacity(CapacityError::HeaderTooLong));
        }

        match buf.read_from(stream) {
            Ok(0) => return Err(Error::Protocol(ProtocolError::HandshakeIncomplete)),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
}

/// Answer a malformed Upgrade request with `400 Bad Request`.
fn reject<S: Connection>(stream: &mut S) -> Result<()> {
    let response = http::Response::builder()
        .status(http::StatusCode::BAD_REQUEST)
        .header("Connection", "close")
        .body(())?;
    write_response(&mut *stream, &response)?;
    stream.flush()?;
    Ok(())
}

/// Accept the given stream as a WebSocket session with the default configuration.
///
/// This reads and validates the client's Upgrade request. The returned session
/// sends the `101 Switching Protocols` response itself as its first action, so
/// call [`Session::run`] or [`Session::spawn`] next.
pub fn accept<S, H>(stream: S, handler: H) -> Result<Session<S>>
where
    S: Connection,
    H: SessionHandler + 'static,
{
    accept_with_config(stream, handler, SessionConfig::default())
}

/// Accept the given stream as a WebSocket session.
///
/// Same as [`accept`] but with a custom session configuration.
pub fn accept_with_config<S, H>(mut stream: S, handler: H, config: SessionConfig) -> Result<Session<S>>
where
    S: Connection,
    H: SessionHandler + 'static,
{
    let (upgrade, tail) = match read_upgrade_request(&mut stream) {
        Ok(parts) => parts,
        Err(err) => {
            warn!("Rejecting upgrade request: {err}");
            if matches!(err, Error::Protocol(_) | Error::Capacity(_) | Error::Url(_)) {
                let _ = reject(&mut stream);
            }
            let _ = stream.shutdown();
            return Err(err);
        }
    };
    Ok(Session::from_partially_read(stream, tail, upgrade, Box::new(handler), config))
}
