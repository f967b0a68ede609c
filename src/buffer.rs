//! Inbound byte buffering.
//!
//! A `ReadBuffer` collects bytes from a blocking stream in fixed-size chunks
//! and exposes the unconsumed part through a cursor, so both the HTTP
//! request parser and the frame decoder can peek at data without committing
//! to it until a complete unit is available.

use std::io::{Cursor, Read, Result as IoResult};

use bytes::Buf;

/// A FIFO buffer for bytes read from the network.
#[derive(Debug)]
pub struct ReadBuffer<const CHUNK_SIZE: usize> {
    storage: Cursor<Vec<u8>>,
    chunk: Box<[u8; CHUNK_SIZE]>,
}

impl<const CHUNK_SIZE: usize> ReadBuffer<CHUNK_SIZE> {
    /// Create a new empty buffer.
    pub fn new() -> Self {
        Self::from_partially_read(Vec::with_capacity(CHUNK_SIZE))
    }

    /// Create a buffer that starts out holding `part`, e.g. bytes a handshake
    /// reader pulled off the stream past the end of the HTTP headers.
    pub fn from_partially_read(part: Vec<u8>) -> Self {
        Self { storage: Cursor::new(part), chunk: Box::new([0; CHUNK_SIZE]) }
    }

    /// Cursor over the stored bytes, positioned at the first unconsumed one.
    pub fn as_cursor(&self) -> &Cursor<Vec<u8>> {
        &self.storage
    }

    /// Mutable cursor over the stored bytes.
    pub fn as_cursor_mut(&mut self) -> &mut Cursor<Vec<u8>> {
        &mut self.storage
    }

    /// Consume the buffer, returning only the bytes not consumed yet.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.compact();
        self.storage.into_inner()
    }

    /// Read the next chunk from `stream`, returning how many bytes arrived.
    ///
    /// Zero means the peer closed its side.
    pub fn read_from<S: Read>(&mut self, stream: &mut S) -> IoResult<usize> {
        self.compact();
        let size = stream.read(&mut *self.chunk)?;
        self.storage.get_mut().extend_from_slice(&self.chunk[..size]);
        Ok(size)
    }

    /// Drop consumed bytes and rewind the cursor.
    fn compact(&mut self) {
        let pos = self.storage.position() as usize;
        if pos > 0 {
            self.storage.get_mut().drain(..pos);
            self.storage.set_position(0);
        }
    }
}

impl<const CHUNK_SIZE: usize> Buf for ReadBuffer<CHUNK_SIZE> {
    fn remaining(&self) -> usize {
        Buf::remaining(self.as_cursor())
    }

    fn chunk(&self) -> &[u8] {
        Buf::chunk(self.as_cursor())
    }

    fn advance(&mut self, cnt: usize) {
        Buf::advance(self.as_cursor_mut(), cnt);
    }
}

impl<const CHUNK_SIZE: usize> Default for ReadBuffer<CHUNK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_whole_input_in_one_chunk() {
        let mut input = Cursor::new(b"GET / HTTP/1.1".to_vec());
        let mut buffer = ReadBuffer::<4096>::new();
        let size = buffer.read_from(&mut input).unwrap();
        assert_eq!(size, 14);
        assert_eq!(buffer.chunk(), b"GET / HTTP/1.1");
        assert_eq!(buffer.read_from(&mut input).unwrap(), 0);
    }

    #[test]
    fn consumed_bytes_are_dropped_on_next_read() {
        let mut inp = Cursor::new(b"\x81\x02hi\x81\x01!".to_vec());
        let mut buf = ReadBuffer::<4>::new();

        assert_eq!(buf.read_from(&mut inp).unwrap(), 4);
        assert_eq!(buf.chunk(), b"\x81\x02hi");

        buf.advance(4);
        assert!(!buf.has_remaining());

        assert_eq!(buf.read_from(&mut inp).unwrap(), 3);
        assert_eq!(buf.chunk(), b"\x81\x01!");
        assert_eq!(buf.as_cursor().get_ref().len(), 3);
    }

    #[test]
    fn partially_read_data_comes_first() {
        let mut inp = Cursor::new(b"llo".to_vec());
        let mut buf = ReadBuffer::<8>::from_partially_read(b"he".to_vec());
        buf.read_from(&mut inp).unwrap();
        assert_eq!(buf.chunk(), b"hello");
        buf.advance(2);
        assert_eq!(buf.into_vec(), b"llo");
    }
}
