//! Length-prefixed framing for the alert stream.
//!
//! Wire format:
//! ```text
//! [payload_len:4][payload:N]
//! ```
//! `payload_len` is an unsigned 32-bit big-endian integer.  Frames are sent
//! back to back on a TCP stream with no separators, so a receiver must be able
//! to reassemble a frame split across reads and to split several frames that
//! arrive in one read.  [`FrameDecoder`] does both.

use thiserror::Error;

/// Size of the big-endian length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors that can occur while framing or de-framing a byte stream.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload is larger than a 32-bit length prefix can describe.
    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    PayloadTooLong(usize),

    /// A length prefix announced a frame larger than the configured maximum.
    #[error("frame of {declared} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { declared: usize, max: usize },

    /// The stream ended while a frame was only partially received.
    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    TruncatedFrame { buffered: usize },

    /// A discovery datagram could not be parsed.
    #[error("malformed datagram: {0}")]
    MalformedDatagram(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Prepends the 4-byte big-endian length of `payload` to a copy of it.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLong`] if `payload` is 4 GiB or larger.
///
/// # Examples
///
/// ```rust
/// use sos_core::protocol::encode_frame;
///
/// let frame = encode_frame(b"{}").unwrap();
/// assert_eq!(frame, vec![0, 0, 0, 2, b'{', b'}']);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLong(payload.len()))?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Stateful de-framer fed with arbitrary chunks of a byte stream.
///
/// The decoder remembers a length prefix it has already read while it waits
/// for the rest of the frame, so chunk boundaries never matter.  A zero-length
/// frame yields an empty payload.
///
/// # Examples
///
/// ```rust
/// use sos_core::protocol::{encode_frame, FrameDecoder};
///
/// let bytes = encode_frame(b"hello").unwrap();
/// let mut decoder = FrameDecoder::new();
///
/// assert!(decoder.feed(&bytes[..3]).unwrap().is_empty());
/// assert_eq!(decoder.feed(&bytes[3..]).unwrap(), vec![b"hello".to_vec()]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    consumed: usize,
    expected_len: Option<usize>,
    max_frame_len: Option<usize>,
}

impl FrameDecoder {
    /// Creates a decoder that accepts frames of any length a u32 can express.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder that rejects any frame announcing more than `max` bytes.
    pub fn with_max_frame_len(max: usize) -> Self {
        Self {
            max_frame_len: Some(max),
            ..Self::default()
        }
    }

    /// Appends a received chunk to the internal buffer without extracting frames.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.consumed > 0 {
            self.buf.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Extracts the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] when a length prefix exceeds
    /// the configured maximum.  The decoder is reset, since the stream can no
    /// longer be trusted.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let expected = match self.expected_len {
            Some(len) => len,
            None => {
                let pending = &self.buf[self.consumed..];
                if pending.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let declared =
                    u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
                if let Some(max) = self.max_frame_len {
                    if declared > max {
                        self.reset();
                        return Err(ProtocolError::FrameTooLarge { declared, max });
                    }
                }
                self.consumed += LENGTH_PREFIX_SIZE;
                self.expected_len = Some(declared);
                declared
            }
        };

        if self.buf.len() - self.consumed < expected {
            return Ok(None);
        }

        let start = self.consumed;
        let frame = self.buf[start..start + expected].to_vec();
        self.consumed += expected;
        self.expected_len = None;

        if self.consumed == self.buf.len() {
            self.buf.clear();
            self.consumed = 0;
        }

        Ok(Some(frame))
    }

    /// Pushes `chunk` and returns every frame it completed, in order.
    ///
    /// Frames completed before a violation inside the same chunk are dropped
    /// together with the error; callers that need them should loop over
    /// [`FrameDecoder::next_frame`] instead.
    ///
    /// # Errors
    ///
    /// See [`FrameDecoder::next_frame`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of bytes held for the frame currently being received.
    ///
    /// Includes an unread length prefix but not one already consumed.
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.consumed
    }

    /// Returns `true` when no partial frame is held.
    pub fn is_idle(&self) -> bool {
        self.expected_len.is_none() && self.buffered_len() == 0
    }

    /// Checks the decoder at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TruncatedFrame`] when the peer closed the
    /// stream in the middle of a frame.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(ProtocolError::TruncatedFrame {
                buffered: self.buffered_len(),
            })
        }
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.consumed = 0;
        self.expected_len = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
