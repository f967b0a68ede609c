//! The duplex byte connection a session runs over.
//!
//! A session needs more than `Read + Write`: its worker must be able to wait
//! a bounded time for the peer to send something, so that idle ticks and
//! queued outbound frames keep getting serviced while the peer is silent.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, TcpStream},
    time::Duration,
};

/// A blocking duplex byte stream with a readability wait.
pub trait Connection: Read + Write {
    /// Wait up to `timeout` for the stream to become readable.
    ///
    /// Returns `true` if a subsequent `read` will not block, which includes
    /// the end-of-stream case. A zero timeout only polls.
    ///
    /// An implementation may leave the stream in a mode where a `read` with
    /// nothing to deliver fails with `WouldBlock` or `TimedOut`; the session
    /// reads as "nothing yet".
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Release the connection. Called once when the session ends.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for TcpStream {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut probe = [0u8; 1];
        let peeked = if timeout.is_zero() {
            self.set_nonblocking(true)?;
            let peeked = self.peek(&mut probe);
            self.set_nonblocking(false)?;
            peeked
        } else {
            // Stays installed: the next wait sets it again anyway.
            self.set_read_timeout(Some(timeout))?;
            self.peek(&mut probe)
        };

        match peeked {
            Ok(_) => Ok(true),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}
