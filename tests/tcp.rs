//! A session over a real TCP connection, with a hand-rolled client.

mod common;

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use common::{init_logger, Recorder};
use websock_engine::{
    accept_with_config,
    handshake::{derive_accept_key, generate_key},
    protocol::{
        frame::{
            coding::{Control, Data, OpCode},
            Frame, FrameSocket,
        },
        CloseFrame,
    },
    session::EndReason,
    CloseCode, SessionConfig,
};

fn upgrade(stream: &mut TcpStream, key: &str) {
    let addr = stream.peer_addr().unwrap();
    write!(
        stream,
        "GET /Websock/Echo?session=42 HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         \r\n"
    )
    .unwrap();
}

/// Read the response head byte by byte so no frame bytes are consumed.
fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

fn masked(mut frame: Frame) -> Frame {
    frame.set_random_mask();
    frame
}

#[test]
fn echo_over_tcp() {
    init_logger();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let recorder = Recorder::echoing();

    let server = {
        let recorder = recorder.clone();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let config = SessionConfig::default().tick_interval(Duration::from_millis(20));
            accept_with_config(stream, recorder, config).unwrap().run()
        })
    };

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let key = generate_key();
    upgrade(&mut stream, &key);

    let head = read_head(&mut stream);
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    let accept = derive_accept_key(key.as_bytes());
    assert!(head.contains(&format!("sec-websocket-accept: {accept}\r\n")), "{head}");

    let mut client = FrameSocket::new(stream);
    client.send(masked(Frame::message("hello".to_owned(), OpCode::Data(Data::Text), true))).unwrap();

    let reply = client.read(None).unwrap().unwrap();
    assert_eq!(reply.header().opcode, OpCode::Data(Data::Text));
    assert!(reply.header().mask.is_none());
    assert_eq!(reply.to_text().unwrap(), "hello");

    client
        .send(masked(Frame::close(Some(CloseFrame { code: CloseCode::Normal, reason: "".into() }))))
        .unwrap();
    let echo = client.read(None).unwrap().unwrap();
    assert_eq!(echo.header().opcode, OpCode::Control(Control::Close));
    assert_eq!(echo.payload(), &[0x03, 0xe8]);

    // The server releases the connection after the handshake.
    assert!(client.read(None).unwrap().is_none());

    assert!(matches!(server.join().unwrap(), EndReason::ClosedByPeer(Some(_))));
    assert_eq!(recorder.messages(), vec!["hello"]);
    assert_eq!(recorder.ended().len(), 1);
}

#[test]
fn stalled_peer_does_not_block_shutdown() {
    init_logger();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let recorder = Recorder::new();

    let server = {
        let recorder = recorder.clone();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let config = SessionConfig::default()
                .tick_interval(Duration::from_millis(20))
                .close_timeout(Duration::from_millis(300));
            let session = accept_with_config(stream, recorder, config).unwrap();
            let handle = session.handle().clone();
            (handle, session.spawn().unwrap())
        })
    };

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    upgrade(&mut stream, &generate_key());
    let (handle, worker) = server.join().unwrap();
    assert!(read_head(&mut stream).starts_with("HTTP/1.1 101"));

    // Two bytes of a six byte masked header, and nothing after them.
    stream.write_all(&[0x81, 0x85]).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(handle.start_shutdown(CloseCode::Normal));
    let started = Instant::now();
    while !worker.is_finished() && started.elapsed() < Duration::from_secs(3) {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(worker.is_finished(), "worker still running, state {:?}", handle.state());
    assert!(matches!(worker.join().unwrap(), EndReason::ShutdownTimeout));

    let mut client = FrameSocket::new(stream);
    let close = client.read(None).unwrap().unwrap();
    assert_eq!(close.header().opcode, OpCode::Control(Control::Close));
    assert_eq!(close.payload(), &[0x03, 0xe8]);
    assert_eq!(recorder.ended(), vec!["peer did not answer close in time"]);
}
