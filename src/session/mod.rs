//! The per-connection session engine.
//!
//! A [`Session`] owns one upgraded connection. Its worker loops on two wait
//! sources, the outbound queue and the socket, and does exactly one unit of
//! work per wake: send one queued frame, consume one inbound frame, or run an
//! idle tick. Completed messages go to the [`SessionHandler`]; producers on
//! other threads talk to the session through a [`SessionHandle`].

mod config;
mod fields;
mod handle;
mod handler;
mod queue;
mod state;
mod trace;

pub use self::{
    config::SessionConfig,
    handle::SessionHandle,
    handler::{FieldId, FieldReading, FieldSource, SessionHandler},
    queue::{OutboundFrame, OutboundQueue},
    state::{EndReason, SessionState},
};

use std::{
    fmt, io,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use log::*;

use self::{
    fields::FieldList,
    trace::{Direction, MsgTrace},
};
use crate::{
    clock::{Clock, SystemClock},
    error::{Error, ProtocolError, Result},
    handshake::server::UpgradeRequest,
    protocol::{
        frame::{
            coding::{Control, Data, OpCode},
            Frame, FrameRead, FrameSocket,
        },
        CloseCode, CloseFrame, IncompleteMessage, IncompleteMessageType, Message,
    },
    stream::Connection,
};

/// What woke the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Work {
    Outbound,
    Inbound,
    Timeout,
}

/// A WebSocket session bound to one upgraded connection.
///
/// Created by [`crate::accept`]. Drive it with [`Session::spawn`] for a
/// dedicated worker thread, or with [`Session::run`] / [`Session::service_once`]
/// on a thread of your own.
pub struct Session<S: Connection> {
    socket: FrameSocket<S>,
    handler: Box<dyn SessionHandler>,
    handle: SessionHandle,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    field_source: Option<Arc<dyn FieldSource>>,
    fields: FieldList,
    /// Data message being reassembled from fragments.
    incomplete: Option<IncompleteMessage>,
    state: SessionState,
    last_in: Instant,
    last_out: Instant,
    last_tick: Instant,
    /// Set while waiting for the peer to answer our Close.
    close_deadline: Option<Instant>,
    ping_nonce: u32,
    waiting_for_pong: bool,
    /// Whether the last unit of work was a send; breaks ties toward receiving.
    sent_last: bool,
    trace: MsgTrace,
    end_reason: Option<EndReason>,
}

impl<S: Connection> Session<S> {
    /// Bind a session to a connection whose Upgrade request was already read.
    pub fn new(
        stream: S,
        upgrade: UpgradeRequest,
        handler: Box<dyn SessionHandler>,
        config: SessionConfig,
    ) -> Self {
        Self::from_partially_read(stream, Vec::new(), upgrade, handler, config)
    }

    /// Same as [`Session::new`], with bytes the peer already sent past the
    /// end of the Upgrade request.
    pub fn from_partially_read(
        stream: S,
        part: Vec<u8>,
        upgrade: UpgradeRequest,
        handler: Box<dyn SessionHandler>,
        config: SessionConfig,
    ) -> Self {
        config.assert_valid();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        Session {
            socket: FrameSocket::from_partially_read(stream, part),
            handler,
            handle: SessionHandle::new(&config, upgrade),
            trace: MsgTrace::new(config.msg_log_path.clone()),
            config,
            clock,
            field_source: None,
            fields: FieldList::default(),
            incomplete: None,
            state: SessionState::Connecting,
            last_in: now,
            last_out: now,
            last_tick: now,
            close_deadline: None,
            ping_nonce: rand::random(),
            waiting_for_pong: false,
            sent_last: false,
            end_reason: None,
        }
    }

    /// Use `clock` for keep-alive, inactivity and close timers.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Poll `source` for the fields the handler subscribes to.
    pub fn with_field_source(mut self, source: Arc<dyn FieldSource>) -> Self {
        self.field_source = Some(source);
        self
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &S {
        self.socket.get_ref()
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.socket.get_mut()
    }

    /// The producer handle of this session.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Read the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the session ended, once it has.
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    /// Whether a keep-alive Ping is still unanswered.
    pub fn waiting_for_pong(&self) -> bool {
        self.waiting_for_pong
    }

    /// Drive the session on the calling thread until it ends.
    pub fn run(mut self) -> EndReason {
        while self.service_once() {}
        self.end_reason.take().unwrap_or(EndReason::Dropped)
    }

    /// Drive the session on a dedicated, named worker thread.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<EndReason>>
    where
        S: Send + 'static,
    {
        let name = format!("websock {}", self.handle.request_path());
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    /// Perform exactly one loop iteration.
    ///
    /// The first call sends the Upgrade response and initializes the handler.
    /// Returns `false` once the session has ended.
    pub fn service_once(&mut self) -> bool {
        match self.state {
            SessionState::Ended => return false,
            SessionState::Connecting => self.connect(),
            _ => {
                if let Err(err) = self.cycle() {
                    self.fail(err);
                }
            }
        }
        self.state != SessionState::Ended
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            trace!("Session state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.handle.set_state(state);
    }

    fn connect(&mut self) {
        let now = self.clock.now();
        self.last_in = now;
        self.last_out = now;
        self.last_tick = now;

        let response = self.handle.upgrade().response_bytes().to_vec();
        if let Err(err) = self.socket.send_raw(&response) {
            return self.end(EndReason::Failed(err));
        }

        match self.handler.initialize(&self.handle) {
            Ok(fields) => {
                self.fields = FieldList::new(fields);
                debug!("Session {} ready, watching {} fields", self.handle.target(), self.fields.len());
                self.set_state(SessionState::Ready);
            }
            Err(err) => {
                warn!("Session {} refused by handler: {err}", self.handle.target());
                self.end(EndReason::InitFailed(err));
            }
        }
    }

    fn cycle(&mut self) -> Result<()> {
        if self.handle.take_overflow() {
            self.end(EndReason::QueueOverflow);
            return Ok(());
        }

        let now = self.clock.now();
        if let Some(deadline) = self.close_deadline {
            if now >= deadline {
                warn!("Peer did not answer Close within {:?}", self.config.close_timeout);
                self.end(EndReason::ShutdownTimeout);
                return Ok(());
            }
        }

        if self.state.is_active() {
            if let Some(timeout) = self.config.inactivity_timeout {
                if now.saturating_duration_since(self.last_in) >= timeout {
                    warn!("Nothing received for {timeout:?}, dropping session");
                    self.send_close_best_effort(CloseCode::Away);
                    self.end(EndReason::InactivityTimeout);
                    return Ok(());
                }
            }

            if let Some(code) = self.handler.check_shutdown_request() {
                self.handle.start_shutdown(code);
            }
            if let Some(code) = self.handle.shutdown_request() {
                return self.start_close(code);
            }
        }

        match self.wait_for_work()? {
            Work::Outbound => self.send_one()?,
            Work::Inbound => self.receive_one()?,
            Work::Timeout => return self.tick(),
        }

        // Steady traffic never times out the wait, so ticks are also due by the clock.
        if self.state.is_active()
            && self.clock.now().saturating_duration_since(self.last_tick) >= self.config.tick_interval
        {
            self.tick()?;
        }
        Ok(())
    }

    fn may_send(&self) -> bool {
        self.state.is_active() && !self.handle.is_output_paused()
    }

    /// Wait until there is something to send or receive, or a tick is due.
    ///
    /// The readability wait is cut into `poll_slice` steps so that a frame
    /// queued meanwhile is picked up without waiting for the whole tick.
    fn wait_for_work(&mut self) -> Result<Work> {
        let deadline = Instant::now() + self.config.tick_interval;
        loop {
            let outbound = self.may_send() && !self.handle.queue().is_empty();
            let inbound = self.socket.has_buffered_frame()? || {
                let slice = if outbound {
                    Duration::ZERO
                } else {
                    deadline.saturating_duration_since(Instant::now()).min(self.config.poll_slice)
                };
                self.socket.get_mut().wait_readable(slice)?
            };

            match (outbound, inbound) {
                (true, true) if self.sent_last => return Ok(Work::Inbound),
                (true, _) => return Ok(Work::Outbound),
                (false, true) => return Ok(Work::Inbound),
                (false, false) if Instant::now() >= deadline => return Ok(Work::Timeout),
                (false, false) => {}
            }
        }
    }

    fn record(&mut self, dir: Direction, kind: &str, payload: &[u8], text: bool) {
        if self.handle.msg_logging_enabled() {
            self.trace.record(dir, kind, payload, text);
        }
    }

    fn write_frame(&mut self, frame: Frame) -> Result<()> {
        trace!("Sending frame: {frame:?}");
        self.socket.send(frame)?;
        self.last_out = self.clock.now();
        self.sent_last = true;
        Ok(())
    }

    /// Send the head of the outbound queue.
    fn send_one(&mut self) -> Result<()> {
        let Some(frame) = self.handle.queue().dequeue_one() else {
            return Ok(());
        };
        let opcode = frame.opcode();
        self.record(Direction::Out, kind_of(opcode), frame.payload(), opcode == OpCode::Data(Data::Text));
        self.write_frame(frame.into_frame())
    }

    /// Read what the peer has sent and handle one frame if it is complete.
    ///
    /// A partial frame stays buffered until later wakes bring the rest.
    fn receive_one(&mut self) -> Result<()> {
        self.sent_last = false;
        match self.socket.read_available(self.config.max_frame_size)? {
            FrameRead::Frame(frame) => {
                self.last_in = self.clock.now();
                self.handle_frame(frame)
            }
            FrameRead::Pending => Ok(()),
            FrameRead::Closed if self.state == SessionState::WaitClientClose => {
                debug!("Peer closed the connection after our Close");
                self.end(EndReason::Shutdown);
                Ok(())
            }
            FrameRead::Closed => Err(Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
        }
    }

    fn handle_frame(&mut self, mut frame: Frame) -> Result<()> {
        // MUST be 0 unless an extension is negotiated that defines meanings
        // for non-zero values. (RFC 6455)
        let header = frame.header();
        if header.rsv1 || header.rsv2 || header.rsv3 {
            return Err(Error::Protocol(ProtocolError::NonZeroReservedBits));
        }

        // A server MUST remove masking for data frames received from a client
        // as described in Section 5.3. (RFC 6455)
        if frame.is_masked() {
            frame.apply_mask();
        } else if !self.config.accept_unmasked_frames {
            // The server MUST close the connection upon receiving a
            // frame that is not masked. (RFC 6455)
            return Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient));
        }

        trace!("Received frame {frame}");

        match frame.header().opcode {
            OpCode::Control(ctl) => {
                // All control frames MUST have a payload length of 125 bytes or less
                // and MUST NOT be fragmented. (RFC 6455)
                if !frame.header().is_final {
                    return Err(Error::Protocol(ProtocolError::FragmentedControlFrame));
                }
                if frame.payload().len() > 125 {
                    return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
                }
                match ctl {
                    Control::Close => {
                        self.record(Direction::In, "CLOSE", frame.payload(), false);
                        let close = frame.into_close()?;
                        self.on_close(close);
                        Ok(())
                    }
                    Control::Ping => {
                        self.record(Direction::In, "PING", frame.payload(), false);
                        let pong = Frame::pong(frame.into_payload());
                        self.record(Direction::Out, "PONG", pong.payload(), false);
                        self.write_frame(pong)
                    }
                    Control::Pong => {
                        self.record(Direction::In, "PONG", frame.payload(), false);
                        // Any Pong counts; not every client echoes our nonce.
                        self.waiting_for_pong = false;
                        Ok(())
                    }
                    Control::Reserved(i) => {
                        Err(Error::Protocol(ProtocolError::UnknownControlFrameType(i)))
                    }
                }
            }

            OpCode::Data(_) if !self.state.is_active() => {
                trace!("Discarding data frame while closing");
                Ok(())
            }

            OpCode::Data(data) => {
                let fin = frame.header().is_final;
                let max_size = self.config.max_message_size;
                match data {
                    Data::Continue => match self.incomplete.as_mut() {
                        Some(msg) => msg.extend(frame.into_payload(), max_size)?,
                        None => return Err(Error::Protocol(ProtocolError::UnexpectedContinueFrame)),
                    },
                    c if self.incomplete.is_some() => {
                        return Err(Error::Protocol(ProtocolError::ExpectedFragment(c)));
                    }
                    Data::Text | Data::Binary => {
                        let kind = if data == Data::Text {
                            IncompleteMessageType::Text
                        } else {
                            IncompleteMessageType::Binary
                        };
                        let mut msg = IncompleteMessage::new(kind);
                        msg.extend(frame.into_payload(), max_size)?;
                        self.incomplete = Some(msg);
                    }
                    Data::Reserved(i) => {
                        return Err(Error::Protocol(ProtocolError::UnknownDataFrameType(i)));
                    }
                }

                if !fin {
                    self.set_state(SessionState::InMessage);
                    return Ok(());
                }
                let Some(msg) = self.incomplete.take() else {
                    return Ok(());
                };
                self.set_state(SessionState::Ready);
                self.dispatch(msg.complete()?)
            }
        }
    }

    fn dispatch(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Text(text) => {
                self.record(Direction::In, "TEXT", text.as_bytes(), true);
                self.handler.process_msg(&self.handle, &text)
            }
            Message::Binary(data) => {
                self.record(Direction::In, "BINARY", &data, false);
                self.handler.process_binary(&self.handle, &data)
            }
        }
    }

    /// Received a close frame.
    fn on_close(&mut self, close: Option<CloseFrame>) {
        if self.state == SessionState::WaitClientClose {
            debug!("Peer answered our Close");
            return self.end(EndReason::Shutdown);
        }

        let reply = match &close {
            Some(frame) if frame.code.is_allowed() => {
                Frame::close(Some(CloseFrame { code: frame.code, reason: "".into() }))
            }
            Some(frame) => {
                debug!("Peer closed with invalid code {}", frame.code);
                Frame::close(Some(CloseFrame { code: CloseCode::Protocol, reason: "".into() }))
            }
            None => Frame::close(None),
        };
        self.record(Direction::Out, "CLOSE", reply.payload(), false);
        if let Err(err) = self.write_frame(reply) {
            debug!("Failed to answer Close: {err}");
        }
        self.end(EndReason::ClosedByPeer(close));
    }

    /// Send our Close and wait for the peer to answer it.
    fn start_close(&mut self, code: CloseCode) -> Result<()> {
        let dropped = self.handle.queue().clear();
        debug!("Starting close handshake with {code}, {dropped} queued frames dropped");
        self.incomplete = None;
        self.set_state(SessionState::WaitClientClose);
        self.close_deadline = Some(self.clock.now() + self.config.close_timeout);

        let frame = Frame::close(Some(CloseFrame { code, reason: "".into() }));
        self.record(Direction::Out, "CLOSE", frame.payload(), false);
        self.write_frame(frame)
    }

    fn send_close_best_effort(&mut self, code: CloseCode) {
        let frame = Frame::close(Some(CloseFrame { code, reason: "".into() }));
        self.record(Direction::Out, "CLOSE", frame.payload(), false);
        if let Err(err) = self.socket.send(frame) {
            debug!("Failed to send Close {code}: {err}");
        }
    }

    fn tick(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.last_tick = now;
        if !self.state.is_active() {
            return Ok(());
        }

        self.handler.idle(&self.handle)?;

        let changed = match &self.field_source {
            Some(source) if !self.fields.is_empty() => self.fields.poll(source.as_ref()),
            _ => Vec::new(),
        };
        for (id, reading) in changed {
            trace!("Field {id} changed to {:?} (valid: {})", reading.value, reading.valid);
            self.handler.field_changed(&self.handle, &id, &reading)?;
        }

        match self.config.ping_interval {
            Some(interval) if now.saturating_duration_since(self.last_out) >= interval => {
                self.send_ping()
            }
            _ => Ok(()),
        }
    }

    fn send_ping(&mut self) -> Result<()> {
        self.ping_nonce = self.ping_nonce.wrapping_add(1);
        if self.waiting_for_pong {
            debug!("Previous keep-alive Ping is still unanswered");
        }
        self.waiting_for_pong = true;
        let frame = Frame::ping(Bytes::copy_from_slice(&self.ping_nonce.to_be_bytes()));
        self.record(Direction::Out, "PING", frame.payload(), false);
        self.write_frame(frame)
    }

    /// Tear the session down after an error.
    fn fail(&mut self, err: Error) {
        match err.close_code() {
            Some(code) if self.state.is_active() => {
                warn!("Session {} failed: {err}", self.handle.target());
                self.send_close_best_effort(code);
            }
            _ => debug!("Session {} failed: {err}", self.handle.target()),
        }
        self.end(EndReason::Failed(err));
    }

    /// Enter the terminal state. Runs at most once per session.
    fn end(&mut self, reason: EndReason) {
        if self.state == SessionState::Ended {
            return;
        }
        self.set_state(SessionState::Ended);
        self.close_deadline = None;
        self.incomplete = None;
        let dropped = self.handle.queue().clear();
        if dropped > 0 {
            debug!("Dropped {dropped} unsent frames");
        }
        if let Err(err) = self.socket.get_mut().shutdown() {
            debug!("Connection shutdown failed: {err}");
        }
        debug!("Session {} ended: {reason}", self.handle.target());
        self.handler.disconnected(&reason);
        self.end_reason = Some(reason);
    }
}

impl<S: Connection> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.handle.target())
            .field("state", &self.state)
            .field("waiting_for_pong", &self.waiting_for_pong)
            .field("end_reason", &self.end_reason)
            .finish()
    }
}

impl<S: Connection> Drop for Session<S> {
    fn drop(&mut self) {
        self.end(EndReason::Dropped);
    }
}

fn kind_of(opcode: OpCode) -> &'static str {
    match opcode {
        OpCode::Data(Data::Text) => "TEXT",
        OpCode::Data(Data::Binary) => "BINARY",
        OpCode::Data(_) => "DATA",
        OpCode::Control(Control::Ping) => "PING",
        OpCode::Control(Control::Pong) => "PONG",
        OpCode::Control(Control::Close) => "CLOSE",
        OpCode::Control(_) => "CONTROL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::server::parse_request;
    use std::{
        io::{Cursor, Read, Write},
        sync::Mutex,
    };

    /// Scripted input, captured output. Reports EOF once the script is consumed.
    struct Script {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for Script {
        fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl SessionHandler for Log {
        fn initialize(&mut self, _session: &SessionHandle) -> Result<Vec<FieldId>> {
            Ok(Vec::new())
        }

        fn process_msg(&mut self, _session: &SessionHandle, text: &str) -> Result<()> {
            self.0.lock().unwrap().push(text.to_owned());
            Ok(())
        }

        fn disconnected(&mut self, reason: &EndReason) {
            self.0.lock().unwrap().push(format!("end: {reason}"));
        }
    }

    fn upgrade() -> UpgradeRequest {
        let raw = b"GET /ws HTTP/1.1\r\nHost: foo.com\r\nConnection: Upgrade\r\n\
            Upgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        UpgradeRequest::new(&parse_request(raw).unwrap().unwrap().1).unwrap()
    }

    fn client_frame(frame: Frame, out: &mut Vec<u8>) {
        let mut frame = frame;
        frame.set_random_mask();
        frame.format(out).unwrap();
    }

    #[test]
    fn reassembles_and_answers_close() {
        let mut input = Vec::new();
        client_frame(Frame::message(&b"Hello, "[..], OpCode::Data(Data::Text), false), &mut input);
        client_frame(Frame::ping(&b"p"[..]), &mut input);
        client_frame(Frame::message(&b"World!"[..], OpCode::Data(Data::Continue), true), &mut input);
        client_frame(
            Frame::close(Some(CloseFrame { code: CloseCode::Normal, reason: "".into() })),
            &mut input,
        );

        let log = Log::default();
        let seen = log.0.clone();
        let script = Script { input: Cursor::new(input), output: Vec::new() };
        let config = SessionConfig::default().ping_interval(None);
        let mut session = Session::new(script, upgrade(), Box::new(log), config);

        while session.service_once() {}
        assert!(matches!(session.end_reason(), Some(EndReason::ClosedByPeer(Some(_)))));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "Hello, World!");
        assert!(seen[1].starts_with("end: closed by peer"));

        let output = &session.get_ref().output;
        assert!(output.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
        // Pong for the interleaved Ping, then the Close echo.
        assert!(output.ends_with(&[0x8a, 0x01, b'p', 0x88, 0x02, 0x03, 0xe8]));
    }

    #[test]
    fn eof_without_close_fails() {
        let script = Script { input: Cursor::new(Vec::new()), output: Vec::new() };
        let session = Session::new(script, upgrade(), Box::new(Log::default()), SessionConfig::default());
        match session.run() {
            EndReason::Failed(Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {}
            other => panic!("unexpected end: {other}"),
        }
    }

    #[test]
    fn dropping_reports_once() {
        let log = Log::default();
        let seen = log.0.clone();
        let script = Script { input: Cursor::new(Vec::new()), output: Vec::new() };
        drop(Session::new(script, upgrade(), Box::new(log), SessionConfig::default()));
        assert_eq!(*seen.lock().unwrap(), vec!["end: dropped".to_owned()]);
    }
}
