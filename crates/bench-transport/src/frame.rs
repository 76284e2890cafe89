//! Frame wire format.
//!
//! Frames are carried back to back on the TCP byte stream:
//!
//! ```text
//! +--------+--------+-------------------+
//! | id: u8 | len:u8 | payload (len)     |
//! +--------+--------+-------------------+
//! ```
//!
//! Identifiers are 6-bit (`0..=63`); payloads are at most 255 bytes.

use bench_common::error::{BenchError, BenchResult};

/// Largest valid frame identifier.
pub const MAX_FRAME_ID: u8 = 0x3F;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// A unit of transport data: an identifier and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Header size in bytes.
    pub const HEADER_SIZE: usize = 2;

    /// Create a frame.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Frame`] if `id` exceeds [`MAX_FRAME_ID`] or the
    /// payload exceeds [`MAX_PAYLOAD_LEN`].
    pub fn new(id: u8, payload: Vec<u8>) -> BenchResult<Self> {
        if id > MAX_FRAME_ID {
            return Err(BenchError::Frame(format!(
                "frame id {id} out of range (max {MAX_FRAME_ID})"
            )));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(BenchError::Frame(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
                payload.len()
            )));
        }
        Ok(Self { id, payload })
    }

    /// Frame with an identifier and payload length already known to be valid.
    pub(crate) fn from_valid(id: u8, payload: Vec<u8>) -> Self {
        debug_assert!(id <= MAX_FRAME_ID && payload.len() <= MAX_PAYLOAD_LEN);
        Self { id, payload }
    }

    /// Frame identifier.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Frame payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }

    /// Append the wire encoding of this frame to `buf`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.push(self.id);
        // Length checked in `new`
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
    }

    /// Wire encoding of this frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }
}

/// Incremental decoder for a stream of frames.
///
/// Bytes may arrive in arbitrary chunks; complete frames are returned in
/// order. After a framing error the stream cannot be resynchronised and
/// every further call fails.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    poisoned: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet part of a returned frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Frame`] when the stream carries an invalid
    /// frame identifier.
    pub fn next_frame(&mut self) -> BenchResult<Option<Frame>> {
        if self.poisoned {
            return Err(BenchError::Frame("stream desynchronised".into()));
        }
        if self.buffer.len() < Frame::HEADER_SIZE {
            return Ok(None);
        }

        let id = self.buffer[0];
        if id > MAX_FRAME_ID {
            self.poisoned = true;
            return Err(BenchError::Frame(format!("invalid frame id {id} on stream")));
        }

        let len = usize::from(self.buffer[1]);
        let total = Frame::HEADER_SIZE + len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let payload = self.buffer[Frame::HEADER_SIZE..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(Frame { id, payload }))
    }
}
