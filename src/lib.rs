//! Blocking, thread-per-connection WebSocket sessions for servers.
//!
//! A [`Session`] owns one upgraded connection and runs its whole lifecycle:
//! the upgrade response, frame reassembly, ping/pong keep-alive, the close
//! handshake and backpressure on an ordered outbound queue. Application logic
//! plugs in through [`SessionHandler`]; other threads feed the session through
//! a cloneable [`SessionHandle`](session::SessionHandle).
//!
//! ```no_run
//! use std::net::TcpListener;
//! use websock_engine::{accept, session::{FieldId, SessionHandle}, Result, SessionHandler};
//!
//! struct Echo;
//!
//! impl SessionHandler for Echo {
//!     fn initialize(&mut self, _session: &SessionHandle) -> Result<Vec<FieldId>> {
//!         Ok(Vec::new())
//!     }
//!
//!     fn process_msg(&mut self, session: &SessionHandle, text: &str) -> Result<()> {
//!         session.queue_text_msg(text)
//!     }
//! }
//!
//! let server = TcpListener::bind("127.0.0.1:9001").unwrap();
//! for stream in server.incoming() {
//!     let session = accept(stream.unwrap(), Echo).unwrap();
//!     session.spawn().unwrap();
//! }
//! ```
#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub use http;

pub mod buffer;
pub mod clock;
pub mod error;
pub mod handshake;
pub mod protocol;
mod server;
pub mod session;
pub mod stream;

const READ_BUFFER_CHUNK_SIZE: usize = 4096;
type ReadBuffer = buffer::ReadBuffer<READ_BUFFER_CHUNK_SIZE>;

pub use crate::{
    error::{Error, Result},
    protocol::{CloseCode, Message},
    server::{accept, accept_with_config, read_upgrade_request},
    session::{Session, SessionConfig, SessionHandler},
};
