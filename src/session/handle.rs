use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;

use crate::{
    error::{Error, ProtocolError, Result},
    handshake::server::UpgradeRequest,
    protocol::frame::coding::{CloseCode, Control, Data, OpCode},
};

use super::{
    queue::{OutboundFrame, OutboundQueue},
    SessionConfig, SessionState,
};

/// State shared between the worker and every producer.
pub(crate) struct Shared {
    pub(crate) queue: OutboundQueue,
    paused: AtomicBool,
    overflowed: AtomicBool,
    /// Close code of the first shutdown request; zero while none was made.
    shutdown_code: AtomicU16,
    state: AtomicU8,
    msg_logging: AtomicBool,
    upgrade: UpgradeRequest,
}

/// The thread-safe surface of a session.
///
/// Cheap to clone. Any thread may queue messages, pause output or request a
/// shutdown through it; the session's worker does the actual I/O.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub(crate) fn new(config: &SessionConfig, upgrade: UpgradeRequest) -> Self {
        SessionHandle {
            shared: Arc::new(Shared {
                queue: OutboundQueue::new(config.max_queue_depth, config.queue_low_water),
                paused: AtomicBool::new(false),
                overflowed: AtomicBool::new(false),
                shutdown_code: AtomicU16::new(0),
                state: AtomicU8::new(SessionState::Connecting.as_u8()),
                msg_logging: AtomicBool::new(config.msg_logging),
                upgrade,
            }),
        }
    }

    pub(crate) fn queue(&self) -> &OutboundQueue {
        &self.shared.queue
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.shared.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn take_overflow(&self) -> bool {
        self.shared.overflowed.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn shutdown_request(&self) -> Option<CloseCode> {
        match self.shared.shutdown_code.load(Ordering::Acquire) {
            0 => None,
            code => Some(CloseCode::from(code)),
        }
    }

    pub(crate) fn upgrade(&self) -> &UpgradeRequest {
        &self.shared.upgrade
    }

    /// Queue a text message.
    pub fn queue_text_msg(&self, text: &str) -> Result<()> {
        self.send_msg(Data::Text, text.as_bytes())
    }

    /// Queue a data message of the given kind, sent as one final frame.
    pub fn send_msg(&self, kind: Data, data: &[u8]) -> Result<()> {
        match kind {
            Data::Text | Data::Binary => self.send_frame(OutboundFrame::new(OpCode::Data(kind), data)),
            Data::Continue => Err(Error::Protocol(ProtocolError::UnexpectedContinueFrame)),
            Data::Reserved(i) => Err(Error::Protocol(ProtocolError::UnknownDataFrameType(i))),
        }
    }

    /// Queue a control frame.
    ///
    /// Ping and Pong go through the queue like data. A Close is not queued: it
    /// starts the close handshake with the code carried in `payload`, or
    /// [`CloseCode::Normal`] if there is none.
    pub fn send_ctrl_msg(&self, kind: Control, payload: &[u8]) -> Result<()> {
        if payload.len() > 125 {
            return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
        }
        match kind {
            Control::Ping | Control::Pong => {
                self.send_frame(OutboundFrame::new(OpCode::Control(kind), payload))
            }
            Control::Close => {
                let code = match payload {
                    [hi, lo, ..] => CloseCode::from(u16::from_be_bytes([*hi, *lo])),
                    _ => CloseCode::Normal,
                };
                self.start_shutdown(code);
                Ok(())
            }
            Control::Reserved(i) => Err(Error::Protocol(ProtocolError::UnknownControlFrameType(i))),
        }
    }

    /// Queue a prepared frame buffer.
    ///
    /// Fails with [`Error::AlreadyClosed`] once shutdown was requested or the
    /// session ended, and with [`Error::SendQueueFull`] at the hard cap. Hitting
    /// the cap while output is paused also dooms the session.
    pub fn send_frame(&self, frame: OutboundFrame) -> Result<()> {
        if self.state() == SessionState::Ended || self.shutdown_request().is_some() {
            return Err(Error::AlreadyClosed);
        }
        match self.shared.queue.enqueue(frame) {
            Err(Error::SendQueueFull) if self.is_output_paused() => {
                if !self.shared.overflowed.swap(true, Ordering::AcqRel) {
                    warn!("Outbound queue overflowed while paused");
                }
                Err(Error::SendQueueFull)
            }
            result => result,
        }
    }

    /// Ask the worker to start the close handshake with `code`.
    ///
    /// Never blocks. Only the first request counts; returns whether this call
    /// was it. Codes that may not appear on the wire are replaced by
    /// [`CloseCode::Normal`].
    pub fn start_shutdown(&self, code: CloseCode) -> bool {
        let code = if code.is_allowed() { code } else { CloseCode::Normal };
        let first = self
            .shared
            .shutdown_code
            .compare_exchange(0, code.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            debug!("Shutdown requested with {code}");
        }
        first
    }

    /// Stop or resume draining the outbound queue.
    pub fn pause_output(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    /// Whether output is currently paused.
    pub fn is_output_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Block the calling thread until the outbound queue drains below its low
    /// watermark. Returns `false` on timeout or if the session ended meanwhile.
    ///
    /// Must not be called from the session's own handler callbacks: the worker
    /// is the one draining the queue.
    pub fn wait_out_space_avail(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_space(timeout) && self.state() != SessionState::Ended
    }

    /// Turn the message trace on or off.
    pub fn enable_msg_logging(&self, enabled: bool) {
        self.shared.msg_logging.store(enabled, Ordering::Relaxed);
    }

    /// Whether the message trace is on.
    pub fn msg_logging_enabled(&self) -> bool {
        self.shared.msg_logging.load(Ordering::Relaxed)
    }

    /// Current lifecycle state as last published by the worker.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Whether the session is exchanging messages.
    pub fn is_ready(&self) -> bool {
        self.state().is_active()
    }

    /// Number of frames waiting to be sent.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.depth()
    }

    /// The request target of the Upgrade request, path plus query.
    pub fn target(&self) -> &str {
        self.shared.upgrade.target()
    }

    /// The path of the Upgrade request.
    pub fn request_path(&self) -> &str {
        self.shared.upgrade.path()
    }

    /// Query parameters of the Upgrade request, in request order.
    pub fn query_params(&self) -> &[(String, String)] {
        self.shared.upgrade.query_params()
    }

    /// The value of the first query parameter named `key`.
    pub fn find_query_param(&self, key: &str) -> Option<&str> {
        self.query_params().iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("target", &self.target())
            .field("state", &self.state())
            .field("queue_depth", &self.queue_depth())
            .field("paused", &self.is_output_paused())
            .finish()
    }
}
