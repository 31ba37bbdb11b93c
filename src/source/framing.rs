//! Length-prefixed framing shared by the UNIX stream and local TCP
//! sources (spec section 4.C: "big-endian 32-bit length followed by the
//! wire message").

use byteorder::{BigEndian, ByteOrder};

/// Accumulates bytes read off a stream connection and yields complete
/// frames as they become available. One instance per connection.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// A fresh, empty buffer.
    pub fn new() -> FrameBuffer {
        FrameBuffer { buf: Vec::new() }
    }

    /// Append freshly-read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop one complete frame's body if the buffer holds a full
    /// length-prefixed frame, leaving any remaining bytes buffered for the
    /// next call. `max_frame_len` bounds the accepted length prefix,
    /// guarding against a hostile/garbled length field holding the
    /// connection's buffer open indefinitely.
    pub fn pop_frame(&mut self, max_frame_len: usize) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = BigEndian::read_u32(&self.buf[..4]) as usize;
        if len > max_frame_len {
            return Err(FrameError::TooLarge(len));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(frame))
    }
}

/// Errors surfaced while accumulating a stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The declared frame length exceeded the configured maximum.
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_frame_delivered_in_pieces() {
        let mut fb = FrameBuffer::new();
        let mut full = vec![0u8, 0, 0, 5];
        full.extend_from_slice(b"hello");

        fb.feed(&full[..3]);
        assert_eq!(fb.pop_frame(1024).unwrap(), None);

        fb.feed(&full[3..]);
        assert_eq!(fb.pop_frame(1024).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn handles_back_to_back_frames() {
        let mut fb = FrameBuffer::new();
        let mut buf = vec![0u8, 0, 0, 1];
        buf.push(b'a');
        buf.extend_from_slice(&[0, 0, 0, 1]);
        buf.push(b'b');
        fb.feed(&buf);

        assert_eq!(fb.pop_frame(1024).unwrap(), Some(vec![b'a']));
        assert_eq!(fb.pop_frame(1024).unwrap(), Some(vec![b'b']));
        assert_eq!(fb.pop_frame(1024).unwrap(), None);
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut fb = FrameBuffer::new();
        fb.feed(&[0, 0, 0, 100]);
        assert_eq!(fb.pop_frame(10), Err(FrameError::TooLarge(100)));
    }
}
