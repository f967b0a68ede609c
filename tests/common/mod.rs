//! Shared fixtures: an in-memory connection and a handler that records calls.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::{self, Cursor, Read, Write},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use websock_engine::{
    handshake::server::{parse_request, UpgradeRequest},
    protocol::{
        frame::{
            coding::{Data, OpCode},
            Frame,
        },
        CloseFrame,
    },
    session::{EndReason, FieldId, FieldReading, SessionHandle},
    stream::Connection,
    CloseCode, Error, Result, Session, SessionConfig, SessionHandler,
};

pub const UPGRADE: &str = "GET /Websock/Test?user=admin&mode=watch HTTP/1.1\r\n\
    Host: localhost\r\n\
    Connection: keep-alive, Upgrade\r\n\
    Upgrade: websocket\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    \r\n";

#[derive(Default)]
struct Pipe {
    input: VecDeque<u8>,
    output: Vec<u8>,
    eof: bool,
    shut_down: bool,
}

/// An in-memory duplex connection. Clones share the same pipe, so a test keeps
/// one clone to feed input and inspect output while the session owns another.
#[derive(Clone, Default)]
pub struct MockConn {
    pipe: Arc<Mutex<Pipe>>,
}

impl MockConn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.pipe.lock().unwrap().input.extend(bytes);
    }

    /// Mask `frame` like a browser would and queue it as input.
    pub fn push_frame(&self, frame: Frame) {
        self.push(&masked_bytes(frame));
    }

    pub fn push_unmasked(&self, frame: Frame) {
        let mut raw = Vec::new();
        frame.format(&mut raw).unwrap();
        self.push(&raw);
    }

    pub fn push_text(&self, text: &str) {
        self.push_frame(text_frame(text));
    }

    pub fn push_close(&self, code: CloseCode) {
        self.push_frame(Frame::close(Some(CloseFrame { code, reason: "".into() })));
    }

    /// Make further reads report end of stream once the input is drained.
    pub fn close_input(&self) {
        self.pipe.lock().unwrap().eof = true;
    }

    pub fn output(&self) -> Vec<u8> {
        self.pipe.lock().unwrap().output.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.pipe.lock().unwrap().shut_down
    }

    /// Everything written after the HTTP response head, decoded into frames.
    pub fn sent_frames(&self) -> Vec<Frame> {
        let output = self.output();
        let start = match output.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(pos) => pos + 4,
            None => return Vec::new(),
        };
        let mut cursor = Cursor::new(&output[start..]);
        let mut frames = Vec::new();
        while let Some(frame) = Frame::parse(&mut cursor).unwrap() {
            frames.push(frame);
        }
        frames
    }

    pub fn sent_of(&self, opcode: OpCode) -> Vec<Frame> {
        self.sent_frames().into_iter().filter(|f| f.header().opcode == opcode).collect()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent_of(OpCode::Data(Data::Text))
            .iter()
            .map(|f| f.to_text().unwrap().to_owned())
            .collect()
    }
}

impl Read for MockConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.lock().unwrap();
        if pipe.input.is_empty() {
            return if pipe.eof { Ok(0) } else { Err(io::ErrorKind::WouldBlock.into()) };
        }
        let n = buf.len().min(pipe.input.len());
        for (dst, src) in buf.iter_mut().zip(pipe.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MockConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.lock().unwrap();
        if pipe.shut_down {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        pipe.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConn {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        {
            let pipe = self.pipe.lock().unwrap();
            if !pipe.input.is_empty() || pipe.eof {
                return Ok(true);
            }
        }
        thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(false)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.pipe.lock().unwrap().shut_down = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Init,
    Msg(String),
    Field(FieldId, FieldReading),
    Ended(String),
}

/// A handler that records every callback. Clones share the record.
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub fields: Vec<FieldId>,
    pub fail_init: bool,
    pub echo: bool,
    pub shutdown_on: Arc<Mutex<Option<CloseCode>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        Recorder { echo: true, ..Self::default() }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Msg(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Ended(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionHandler for Recorder {
    fn initialize(&mut self, _session: &SessionHandle) -> Result<Vec<FieldId>> {
        self.push(Event::Init);
        if self.fail_init {
            return Err(Error::handler("no such user"));
        }
        Ok(self.fields.clone())
    }

    fn process_msg(&mut self, session: &SessionHandle, text: &str) -> Result<()> {
        self.push(Event::Msg(text.to_owned()));
        if self.echo {
            session.queue_text_msg(text)?;
        }
        Ok(())
    }

    fn field_changed(
        &mut self,
        _session: &SessionHandle,
        id: &FieldId,
        reading: &FieldReading,
    ) -> Result<()> {
        self.push(Event::Field(id.clone(), reading.clone()));
        Ok(())
    }

    fn check_shutdown_request(&mut self) -> Option<CloseCode> {
        self.shutdown_on.lock().unwrap().take()
    }

    fn disconnected(&mut self, reason: &EndReason) {
        self.push(Event::Ended(reason.to_string()));
    }
}

/// The wire bytes of `frame` as a browser would send it.
pub fn masked_bytes(mut frame: Frame) -> Vec<u8> {
    frame.set_random_mask();
    let mut raw = Vec::new();
    frame.format(&mut raw).unwrap();
    raw
}

pub fn text_frame(text: &str) -> Frame {
    Frame::message(text.to_owned(), OpCode::Data(Data::Text), true)
}

pub fn upgrade_request() -> UpgradeRequest {
    let (_, request) = parse_request(UPGRADE.as_bytes()).unwrap().unwrap();
    UpgradeRequest::new(&request).unwrap()
}

/// Config with instant ticks, so an idle `service_once` returns at once.
pub fn test_config() -> SessionConfig {
    SessionConfig::default().tick_interval(Duration::ZERO).poll_slice(Duration::ZERO)
}

/// A session over `conn` that already sent its Upgrade response.
pub fn connected(conn: &MockConn, handler: Recorder, config: SessionConfig) -> Session<MockConn> {
    let mut session = Session::new(conn.clone(), upgrade_request(), Box::new(handler), config);
    assert!(session.service_once());
    session
}

pub fn close_code(frame: &Frame) -> u16 {
    let payload = frame.payload();
    u16::from_be_bytes([payload[0], payload[1]])
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
