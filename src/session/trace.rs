//! Optional plaintext trace of exchanged messages.
//!
//! One line per event, appended:
//! `<ms since session start> <IN|OUT> <kind> <len> <preview>`.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    time::Instant,
};

use log::*;

const PREVIEW_CHARS: usize = 128;
const TRACE_TARGET: &str = "websock_engine::msgs";

/// Direction of a traced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

#[derive(Debug)]
pub(crate) struct MsgTrace {
    started: Instant,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl MsgTrace {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        MsgTrace { started: Instant::now(), path, file: None }
    }

    /// Format one trace line.
    pub(crate) fn format_line(
        elapsed_ms: u128,
        dir: Direction,
        kind: &str,
        payload: &[u8],
        text: bool,
    ) -> String {
        let preview = if text && !payload.is_empty() {
            let s = String::from_utf8_lossy(payload);
            let mut preview: String = s.chars().take(PREVIEW_CHARS).collect();
            if s.chars().count() > PREVIEW_CHARS {
                preview.push_str("...");
            }
            preview.replace(['\r', '\n'], " ")
        } else {
            "-".to_owned()
        };
        format!("{elapsed_ms} {} {kind} {} {preview}", dir.as_str(), payload.len())
    }

    /// Write one event. Failing to write the trace never affects the session;
    /// the file is dropped and tracing falls back to the log.
    pub(crate) fn record(&mut self, dir: Direction, kind: &str, payload: &[u8], text: bool) {
        let line =
            Self::format_line(self.started.elapsed().as_millis(), dir, kind, payload, text);

        if self.file.is_none() {
            if let Some(path) = self.path.take() {
                match OpenOptions::new().create(true).append(true).open(&path) {
                    Ok(file) => self.file = Some(file),
                    Err(err) => warn!("Cannot open message trace {}: {err}", path.display()),
                }
            }
        }

        if let Some(file) = self.file.as_mut() {
            if let Err(err) = writeln!(file, "{line}") {
                warn!("Message trace write failed: {err}");
                self.file = None;
            }
            return;
        }

        info!(target: TRACE_TARGET, "{line}");
    }
}
