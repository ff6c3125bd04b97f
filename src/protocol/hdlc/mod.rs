//! HDLC-like framing over a byte stream.
//!
//! Frames are flag-delimited and byte-escaped, with a varint-encoded
//! address, a control byte, an opaque payload and a trailing CRC-32 frame
//! check sequence:
//!
//! ```text
//! FLAG | varint(address) | control | escaped payload | FCS (LE u32) | FLAG
//! ```
//!
//! The FCS covers the *unescaped* address, control and payload bytes. Flag
//! and escape bytes inside the frame body are written as `ESCAPE` followed
//! by the original byte XOR'd with [`ESCAPE_MASK`].
//!
//! [`Encoder`] writes frames to an async byte sink; [`Decoder`] consumes an
//! async byte source one byte at a time, yielding validated frames or
//! well-typed errors.

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;

use thiserror::Error;

/// Frame delimiter byte.
pub const FLAG: u8 = 0x7E;
/// Escape byte; the byte that follows is XOR'd with [`ESCAPE_MASK`].
pub const ESCAPE: u8 = 0x7D;
/// XOR mask applied to escaped bytes.
pub const ESCAPE_MASK: u8 = 0x20;
/// Control byte for unnumbered (U) frames; all RPC traffic uses this.
pub const UNNUMBERED_UFRAME: u8 = 0x03;

pub(crate) const CONTROL_SIZE: usize = 1;
pub(crate) const FCS_SIZE: usize = 4;
/// Smallest legal unescaped frame content: one address byte, the control
/// byte and the FCS.
pub(crate) const MIN_CONTENT_SIZE: usize = 6;

/// Upper bound on unescaped frame content the decoder will buffer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Returns true for bytes that must be escaped inside a frame.
pub fn needs_escaping(byte: u8) -> bool {
    byte == FLAG || byte == ESCAPE
}

/// Errors surfaced by the framing decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Corrupt framing: CRC mismatch, short frame, illegal escape sequence,
    /// stray bytes between frames, or a failed transport read.
    #[error("frame data loss")]
    DataLoss,
    /// A frame exceeded [`MAX_FRAME_SIZE`] and was discarded.
    #[error("frame exceeds {MAX_FRAME_SIZE} byte limit")]
    ResourceExhausted,
}

/// A validated frame: unescaped address, control byte and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    address: u64,
    control: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(address: u64, control: u8, payload: Vec<u8>) -> Self {
        Self { address, control, payload }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
