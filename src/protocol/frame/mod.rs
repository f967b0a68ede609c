//! Utilities to work with raw WebSocket frames.

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;

pub use self::frame::{CloseFrame, Frame, FrameHeader};

use std::io::{ErrorKind, Read, Write};

use bytes::Bytes;
use log::*;

use crate::{
    error::{CapacityError, Error, Result},
    ReadBuffer,
};

/// A reader and writer for WebSocket frames.
#[derive(Debug)]
pub struct FrameSocket<Stream> {
    /// The underlying network stream.
    stream: Stream,
    /// Codec for reading/writing frames.
    codec: FrameCodec,
}

impl<Stream> FrameSocket<Stream> {
    /// Create a new frame socket.
    pub fn new(stream: Stream) -> Self {
        FrameSocket { stream, codec: FrameCodec::new() }
    }

    /// Create a new frame socket from partially read data.
    pub fn from_partially_read(stream: Stream, part: Vec<u8>) -> Self {
        FrameSocket { stream, codec: FrameCodec::from_partially_read(part) }
    }

    /// Extract a stream from the socket.
    pub fn into_inner(self) -> (Stream, Vec<u8>) {
        (self.stream, self.codec.in_buffer.into_vec())
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Stream {
        &self.stream
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// Whether a whole frame is already buffered and can be taken without touching the stream.
    pub fn has_buffered_frame(&mut self) -> Result<bool> {
        self.codec.has_buffered_frame()
    }
}

/// Outcome of a single read attempt on a [`FrameSocket`].
#[derive(Debug)]
pub enum FrameRead {
    /// A whole frame was decoded.
    Frame(Frame),
    /// Part of a frame, or nothing at all, is available so far.
    Pending,
    /// The peer closed its side of the stream.
    Closed,
}

impl<Stream> FrameSocket<Stream>
where
    Stream: Read,
{
    /// Read a frame from stream.
    ///
    /// Blocks on the stream until a whole frame is buffered. Returns `None` on end of stream.
    pub fn read(&mut self, max_size: Option<usize>) -> Result<Option<Frame>> {
        self.codec.read_frame(&mut self.stream, max_size)
    }

    /// Take a buffered frame, or read from the stream at most once and decode what arrived.
    ///
    /// Never waits for the rest of a partial frame: the bytes stay buffered and
    /// the next call picks up where this one stopped. `WouldBlock` and `TimedOut`
    /// from the stream count as nothing read yet.
    pub fn read_available(&mut self, max_size: Option<usize>) -> Result<FrameRead> {
        self.codec.read_available(&mut self.stream, max_size)
    }
}

impl<Stream> FrameSocket<Stream>
where
    Stream: Write,
{
    /// Write a frame to stream and flush it.
    ///
    /// Frames are never split: the whole frame is handed to the stream before returning.
    pub fn send(&mut self, frame: Frame) -> Result<()> {
        self.codec.write_frame(&mut self.stream, frame)
    }

    /// Write raw, already formatted bytes to the stream and flush it.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// A codec for WebSocket frames.
#[derive(Debug)]
pub(super) struct FrameCodec {
    /// Buffer to read data from the stream.
    in_buffer: ReadBuffer,
    /// Buffer to send packets to the network.
    out_buffer: Vec<u8>,
    /// Header and remaining size of the incoming packet being processed.
    header: Option<(FrameHeader, u64)>,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub(super) fn new() -> Self {
        Self { in_buffer: ReadBuffer::new(), out_buffer: Vec::new(), header: None }
    }

    /// Create a new frame codec from partially read data.
    pub(super) fn from_partially_read(part: Vec<u8>) -> Self {
        Self {
            in_buffer: ReadBuffer::from_partially_read(part),
            out_buffer: Vec::new(),
            header: None,
        }
    }

    /// Decode the next frame from buffered bytes only.
    fn decode(&mut self, max_size: Option<usize>) -> Result<Option<Frame>> {
        let max_size = max_size.unwrap_or(usize::MAX);
        let cursor = self.in_buffer.as_cursor_mut();

        if self.header.is_none() {
            self.header = FrameHeader::parse(cursor)?;
        }

        if let Some((header, length)) = self.header.take() {
            // Enforce frame size limit early and make sure `length`
            // is not too big (fits into `usize`).
            if length > max_size as u64 {
                return Err(Error::Capacity(CapacityError::MessageTooLong {
                    size: length as usize,
                    max_size,
                }));
            }

            let input_size = cursor.get_ref().len() as u64 - cursor.position();
            if length <= input_size {
                // No truncation here since `length` is checked above
                let start = cursor.position() as usize;
                let end = start + length as usize;
                let payload = Bytes::copy_from_slice(&cursor.get_ref()[start..end]);
                cursor.set_position(end as u64);
                let frame = Frame::from_payload(header, payload);
                trace!("received frame {frame}");
                return Ok(Some(frame));
            }

            self.header = Some((header, length));
        }
        Ok(None)
    }

    /// Whether the buffer holds a whole frame. Parses a pending header on the way.
    pub(super) fn has_buffered_frame(&mut self) -> Result<bool> {
        let cursor = self.in_buffer.as_cursor_mut();
        if self.header.is_none() {
            self.header = FrameHeader::parse(cursor)?;
        }
        Ok(match self.header {
            Some((_, length)) => length <= cursor.get_ref().len() as u64 - cursor.position(),
            None => false,
        })
    }

    /// Read a frame from the provided stream, blocking until it is complete.
    pub(super) fn read_frame<Stream>(
        &mut self,
        stream: &mut Stream,
        max_size: Option<usize>,
    ) -> Result<Option<Frame>>
    where
        Stream: Read,
    {
        loop {
            if let Some(frame) = self.decode(max_size)? {
                return Ok(Some(frame));
            }

            // Not enough data in buffer.
            let size = match self.in_buffer.read_from(stream) {
                Ok(size) => size,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if size == 0 {
                trace!("no frame received");
                return Ok(None);
            }
        }
    }

    /// Decode a buffered frame, or read once and decode what arrived.
    pub(super) fn read_available<Stream>(
        &mut self,
        stream: &mut Stream,
        max_size: Option<usize>,
    ) -> Result<FrameRead>
    where
        Stream: Read,
    {
        if let Some(frame) = self.decode(max_size)? {
            return Ok(FrameRead::Frame(frame));
        }

        match self.in_buffer.read_from(stream) {
            Ok(0) => {
                trace!("stream closed");
                Ok(FrameRead::Closed)
            }
            Ok(_) => Ok(match self.decode(max_size)? {
                Some(frame) => FrameRead::Frame(frame),
                None => FrameRead::Pending,
            }),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(FrameRead::Pending)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Format the frame into the output buffer and write it out in full.
    pub(super) fn write_frame<Stream>(&mut self, stream: &mut Stream, frame: Frame) -> Result<()>
    where
        Stream: Write,
    {
        trace!("writing frame {frame}");
        self.out_buffer.clear();
        frame.format_into_buf(&mut self.out_buffer)?;
        stream.write_all(&self.out_buffer)?;
        stream.flush()?;
        Ok(())
    }
}
