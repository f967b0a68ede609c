use std::fmt;

use crate::{error::Error, protocol::CloseFrame};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sending the upgrade response and initializing the application side.
    Connecting,
    /// Exchanging messages; no fragmented message in progress.
    Ready,
    /// Exchanging messages; a fragmented message is being reassembled.
    InMessage,
    /// We sent a Close and are waiting for the peer to answer it.
    WaitClientClose,
    /// Terminal. The connection has been released.
    Ended,
}

impl SessionState {
    /// Tell if we're allowed to process normal messages.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::InMessage)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SessionState::Connecting => 0,
            SessionState::Ready => 1,
            SessionState::InMessage => 2,
            SessionState::WaitClientClose => 3,
            SessionState::Ended => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Ready,
            2 => SessionState::InMessage,
            3 => SessionState::WaitClientClose,
            _ => SessionState::Ended,
        }
    }
}

/// Why a session ended. Reported exactly once through
/// [`SessionHandler::disconnected`](super::SessionHandler::disconnected).
#[derive(Debug)]
pub enum EndReason {
    /// The peer started the close handshake and we answered it.
    ClosedByPeer(Option<CloseFrame>),
    /// We started the close handshake and the peer completed it.
    Shutdown,
    /// We started the close handshake and the peer never answered in time.
    ShutdownTimeout,
    /// The outbound queue hit its hard cap while output was paused.
    QueueOverflow,
    /// Nothing was received for the configured inactivity timeout.
    InactivityTimeout,
    /// The application refused the session during initialization.
    InitFailed(Error),
    /// A protocol, I/O or application error ended the session.
    Failed(Error),
    /// The session was dropped before it reached its end.
    Dropped,
}

impl EndReason {
    /// Whether the session ended through a completed or attempted close handshake.
    pub fn is_orderly(&self) -> bool {
        matches!(self, EndReason::ClosedByPeer(_) | EndReason::Shutdown | EndReason::ShutdownTimeout)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::ClosedByPeer(Some(close)) => write!(f, "closed by peer: {close}"),
            EndReason::ClosedByPeer(None) => write!(f, "closed by peer"),
            EndReason::Shutdown => write!(f, "shut down"),
            EndReason::ShutdownTimeout => write!(f, "peer did not answer close in time"),
            EndReason::QueueOverflow => write!(f, "outbound queue overflowed while paused"),
            EndReason::InactivityTimeout => write!(f, "peer inactive"),
            EndReason::InitFailed(err) => write!(f, "initialization failed: {err}"),
            EndReason::Failed(err) => write!(f, "failed: {err}"),
            EndReason::Dropped => write!(f, "dropped"),
        }
    }
}
