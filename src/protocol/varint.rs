//! Variable-length integer codec used by the HDLC framing layer.
//!
//! Four LEB128-style formats are supported, differing in which end of each
//! byte carries the "last byte" sentinel and in the sentinel's sense
//! (zero- or one-terminated). Seven bits of every byte carry value data,
//! least-significant group first, so a `u64` needs at most ten bytes.
//!
//! The HDLC address field on the wire uses
//! [`Format::OneTerminatedLeastSignificant`]: value bits shifted left by one,
//! terminator in bit 0, set on the final byte.

use smallvec::SmallVec;

/// Maximum encoded size of a 64-bit varint.
pub const MAX_VARINT64_SIZE: usize = 10;

/// Wire format of a varint.
///
/// Bit 1 of the discriminant selects the terminator sense, bit 0 selects
/// which end of the byte holds the terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    ZeroTerminatedLeastSignificant = 0,
    ZeroTerminatedMostSignificant = 1,
    OneTerminatedLeastSignificant = 2,
    OneTerminatedMostSignificant = 3,
}

impl Format {
    fn zero_terminated(self) -> bool {
        (self as u8) & 0b10 == 0
    }

    fn least_significant(self) -> bool {
        (self as u8) & 0b01 == 0
    }
}

/// Encoded form of a varint, held inline.
pub type EncodedVarint = SmallVec<[u8; MAX_VARINT64_SIZE]>;

/// Encodes `value` in the given format, emitting 1-10 bytes.
///
/// Zero encodes as a single terminator byte.
///
/// # Arguments
///
/// * `value` - The integer to encode.
/// * `format` - Which of the four terminator placements to emit.
///
/// # Returns
///
/// The encoded bytes, least-significant seven-bit group first.
pub fn encode(value: u64, format: Format) -> EncodedVarint {
    let value_shift = if format.least_significant() { 1 } else { 0 };
    let term_shift = if value_shift == 1 { 0 } else { 7 };

    let (cont, term) = if format.zero_terminated() {
        (1u8 << term_shift, 0u8)
    } else {
        (0u8, 1u8 << term_shift)
    };

    let mut output = EncodedVarint::new();
    let mut remaining = value;
    loop {
        let last_byte = (remaining >> 7) == 0;
        let mut byte = ((remaining as u8) & 0x7f) << value_shift;
        byte |= if last_byte { term } else { cont };
        output.push(byte);
        remaining >>= 7;
        if last_byte {
            break;
        }
    }
    output
}

/// Decodes a varint from the front of `input`.
///
/// Malformed input never panics.
///
/// # Arguments
///
/// * `input` - Buffer whose leading bytes hold the varint; trailing bytes
///   are ignored.
/// * `format` - The terminator placement the bytes were encoded with.
///
/// # Returns
///
/// The decoded value and the number of bytes consumed, or `None` if
/// `input` runs out (or the ten-byte limit is hit) before a terminator
/// byte appears.
pub fn decode(input: &[u8], format: Format) -> Option<(u64, usize)> {
    let (mask, shift) = if format.least_significant() {
        (0xfeu8, 1u32)
    } else {
        (0x7fu8, 0u32)
    };

    let is_last_byte = |byte: u8| {
        if format.zero_terminated() {
            byte & !mask == 0
        } else {
            byte & !mask != 0
        }
    };

    let max_count = MAX_VARINT64_SIZE.min(input.len());
    let mut value = 0u64;
    for (count, &byte) in input.iter().take(max_count).enumerate() {
        value |= (((byte & mask) >> shift) as u64) << (7 * count);
        if is_last_byte(byte) {
            return Some((value, count + 1));
        }
    }
    None
}
