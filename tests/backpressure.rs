//! Outbound queue limits, pausing and producer waits.

mod common;

use std::{thread, time::Duration};

use common::*;
use websock_engine::{
    session::{EndReason, SessionState},
    CloseCode, Error,
};

#[test]
fn overflow_while_paused_ends_the_session() {
    init_logger();
    let conn = MockConn::new();
    let recorder = Recorder::new();
    let mut session = connected(&conn, recorder.clone(), test_config().max_queue_depth(8));
    let handle = session.handle().clone();

    handle.pause_output(true);
    let producer = thread::spawn(move || {
        let mut accepted = 0;
        loop {
            match handle.queue_text_msg("tick") {
                Ok(()) => accepted += 1,
                Err(Error::SendQueueFull) => return accepted,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
    });
    assert_eq!(producer.join().unwrap(), 8);

    // Nothing leaves while paused.
    assert_eq!(session.handle().queue_depth(), 8);
    assert!(!session.service_once());

    assert!(matches!(session.end_reason(), Some(EndReason::QueueOverflow)));
    assert_eq!(session.state(), SessionState::Ended);
    assert_eq!(session.handle().queue_depth(), 0);
    assert!(conn.sent_texts().is_empty());
    assert!(conn.is_shut_down());
    assert_eq!(recorder.ended().len(), 1);
}

#[test]
fn paused_output_holds_frames_until_resumed() {
    let conn = MockConn::new();
    let mut session = connected(&conn, Recorder::new(), test_config());

    session.handle().pause_output(true);
    session.handle().queue_text_msg("held").unwrap();
    for _ in 0..3 {
        session.service_once();
    }
    assert!(conn.sent_texts().is_empty());

    session.handle().pause_output(false);
    session.service_once();
    assert_eq!(conn.sent_texts(), vec!["held"]);
}

#[test]
fn full_queue_without_pause_is_not_fatal() {
    let conn = MockConn::new();
    let mut session = connected(&conn, Recorder::new(), test_config().max_queue_depth(2));
    let handle = session.handle().clone();

    handle.queue_text_msg("1").unwrap();
    handle.queue_text_msg("2").unwrap();
    assert!(matches!(handle.queue_text_msg("3"), Err(Error::SendQueueFull)));

    assert!(session.service_once());
    assert!(session.service_once());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(conn.sent_texts(), vec!["1", "2"]);
}

#[test]
fn producer_waits_for_space() {
    let conn = MockConn::new();
    let config = test_config().max_queue_depth(16).close_timeout(Duration::from_millis(50));
    let session = connected(&conn, Recorder::new(), config);
    let handle = session.handle().clone();

    for n in 0..16 {
        handle.queue_text_msg(&n.to_string()).unwrap();
    }
    // Nobody drains yet.
    assert!(!handle.wait_out_space_avail(Duration::from_millis(20)));

    let worker = session.spawn().unwrap();
    assert!(handle.wait_out_space_avail(Duration::from_secs(5)));
    assert!(handle.queue_depth() < 8);

    handle.start_shutdown(CloseCode::Normal);
    assert!(matches!(worker.join().unwrap(), EndReason::ShutdownTimeout));
    assert!(!handle.wait_out_space_avail(Duration::from_millis(1)));
}
