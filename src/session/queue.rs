//! Outbound frames and the queue producers hand them to the worker through.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};

use crate::{
    error::{Error, Result},
    protocol::frame::{coding::OpCode, Frame},
};

/// A tagged byte buffer waiting to be sent as exactly one frame.
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    opcode: OpCode,
    payload: BytesMut,
}

impl OutboundFrame {
    /// Copy `data` into a new frame buffer.
    pub fn new(opcode: OpCode, data: &[u8]) -> Self {
        OutboundFrame { opcode, payload: BytesMut::from(data) }
    }

    /// Adopt an existing buffer without copying. Its spare capacity is kept.
    pub fn from_buffer(opcode: OpCode, payload: BytesMut) -> Self {
        OutboundFrame { opcode, payload }
    }

    /// The opcode the frame goes out with.
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// The populated part of the buffer.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of payload bytes actually populated.
    pub fn used_len(&self) -> usize {
        self.payload.len()
    }

    /// Allocated size of the buffer, at least [`Self::used_len`].
    pub fn capacity(&self) -> usize {
        self.payload.capacity()
    }

    /// Turn the buffer into a single final wire frame.
    pub(crate) fn into_frame(self) -> Frame {
        let payload: Bytes = self.payload.freeze();
        match self.opcode {
            OpCode::Data(_) => Frame::message(payload, self.opcode, true),
            OpCode::Control(_) => {
                let mut frame = Frame::ping(payload);
                frame.header_mut().opcode = self.opcode;
                frame
            }
        }
    }
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundFrame")
            .field("opcode", &self.opcode)
            .field("used_len", &self.used_len())
            .finish()
    }
}

/// A FIFO of outbound frames shared between any number of producers and one worker.
///
/// Strictly ordered: frames leave in the order they were accepted.
pub struct OutboundQueue {
    frames: Mutex<VecDeque<OutboundFrame>>,
    space_avail: Condvar,
    max_depth: usize,
    low_water: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `max_depth` frames.
    ///
    /// Producers waiting for space are released once the depth drops below `low_water`.
    pub fn new(max_depth: usize, low_water: usize) -> Self {
        OutboundQueue {
            frames: Mutex::new(VecDeque::new()),
            space_avail: Condvar::new(),
            max_depth,
            low_water: low_water.min(max_depth.saturating_sub(1)),
        }
    }

    /// Depth a waiting producer needs to see before it resumes.
    fn resume_depth(&self) -> usize {
        self.low_water.max(1)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<OutboundFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame to the tail.
    ///
    /// Fails with [`Error::SendQueueFull`] if the queue is at its hard cap.
    pub fn enqueue(&self, frame: OutboundFrame) -> Result<()> {
        let mut frames = self.lock();
        if frames.len() >= self.max_depth {
            return Err(Error::SendQueueFull);
        }
        frames.push_back(frame);
        Ok(())
    }

    /// Pop the head, if any.
    pub fn dequeue_one(&self) -> Option<OutboundFrame> {
        let mut frames = self.lock();
        let frame = frames.pop_front();
        if frame.is_some() && frames.len() < self.resume_depth() {
            self.space_avail.notify_all();
        }
        frame
    }

    /// Discard everything pending, returning how many frames were dropped.
    pub fn clear(&self) -> usize {
        let mut frames = self.lock();
        let dropped = frames.len();
        frames.clear();
        self.space_avail.notify_all();
        dropped
    }

    /// Number of frames waiting.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether the queue has reached its hard cap.
    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.max_depth
    }

    /// Block the calling thread until the depth is below the low watermark.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_space(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut frames = self.lock();
        while frames.len() >= self.resume_depth() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            frames = match self.space_avail.wait_timeout(frames, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("depth", &self.depth())
            .field("max_depth", &self.max_depth)
            .field("low_water", &self.low_water)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::coding::{Control, Data};
    use std::{sync::Arc, thread};

    fn text(s: &str) -> OutboundFrame {
        OutboundFrame::new(OpCode::Data(Data::Text), s.as_bytes())
    }

    #[test]
    fn fifo_order() {
        let queue = OutboundQueue::new(8, 4);
        for s in ["a", "b", "c"] {
            queue.enqueue(text(s)).unwrap();
        }
        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.dequeue_one().unwrap().payload(), b"a");
        assert_eq!(queue.dequeue_one().unwrap().payload(), b"b");
        assert_eq!(queue.dequeue_one().unwrap().payload(), b"c");
        assert!(queue.dequeue_one().is_none());
    }

    #[test]
    fn hard_cap_rejects() {
        let queue = OutboundQueue::new(2, 1);
        queue.enqueue(text("1")).unwrap();
        queue.enqueue(text("2")).unwrap();
        assert!(queue.is_full());
        assert!(matches!(queue.enqueue(text("3")), Err(Error::SendQueueFull)));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn adopted_buffer_keeps_capacity() {
        let mut buf = BytesMut::with_capacity(1024);
        buf.extend_from_slice(b"ping");
        let frame = OutboundFrame::from_buffer(OpCode::Control(Control::Ping), buf);
        assert_eq!(frame.used_len(), 4);
        assert!(frame.capacity() >= 1024);

        let wire = frame.into_frame();
        assert_eq!(wire.header().opcode, OpCode::Control(Control::Ping));
        assert!(wire.header().is_final);
        assert_eq!(wire.payload(), b"ping");
    }

    #[test]
    fn wait_space_times_out_when_nobody_drains() {
        let queue = OutboundQueue::new(4, 2);
        for s in ["1", "2", "3"] {
            queue.enqueue(text(s)).unwrap();
        }
        assert!(!queue.wait_space(Duration::from_millis(20)));
    }

    #[test]
    fn wait_space_released_by_drain() {
        let queue = Arc::new(OutboundQueue::new(4, 2));
        for s in ["1", "2", "3", "4"] {
            queue.enqueue(text(s)).unwrap();
        }

        let drainer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                while queue.dequeue_one().is_some() {}
            })
        };

        assert!(queue.wait_space(Duration::from_secs(5)));
        drainer.join().unwrap();
        assert!(queue.depth() < 2);
    }
}
