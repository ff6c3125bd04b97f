use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::varint::{self, Format};

use super::{
    DecodeError, Frame, CONTROL_SIZE, ESCAPE, ESCAPE_MASK, FCS_SIZE, FLAG, MAX_FRAME_SIZE,
    MIN_CONTENT_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a flag; non-flag bytes here are counted as discarded.
    InterFrame,
    /// Accumulating unescaped frame content.
    InFrame,
    /// An escape byte was read; the next byte is XOR'd with the mask.
    FrameEscape,
}

/// Streaming HDLC decoder.
///
/// Consumes the byte source one byte at a time and yields validated frames.
/// Content is unescaped into a bounded buffer; the last four content bytes
/// sit in a small ring so that, once the closing flag arrives, they can be
/// read back as the transmitted FCS while the running CRC covers exactly
/// the bytes before them (bytes are checksummed as the ring ejects them).
pub struct Decoder<R> {
    reader: R,
    buffer: Vec<u8>,
    state: State,
    /// Unescaped content bytes seen since the last reset. Counted past the
    /// buffer bound so oversized frames are detected rather than truncated.
    current_frame_size: usize,
    last_read_bytes: [u8; FCS_SIZE],
    last_read_byte_index: usize,
    fcs: Hasher,
}

impl<R> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            state: State::InterFrame,
            current_frame_size: 0,
            last_read_bytes: [0; FCS_SIZE],
            last_read_byte_index: 0,
            fcs: Hasher::new(),
        }
    }

    /// Consumes the decoder, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Feeds one byte to the state machine.
    ///
    /// After every yielded frame or error the accumulators are clean and
    /// decoding continues with the next byte.
    ///
    /// # Arguments
    ///
    /// * `byte` - The next raw wire byte.
    ///
    /// # Returns
    ///
    /// `Ok(Some(frame))` when the byte completed a valid frame,
    /// `Ok(None)` when more input is needed, or the framing error the byte
    /// exposed.
    pub fn process(&mut self, byte: u8) -> Result<Option<Frame>, DecodeError> {
        match self.state {
            State::InterFrame => {
                if byte == FLAG {
                    let discarded = self.current_frame_size;
                    self.start_frame();
                    if discarded != 0 {
                        return Err(DecodeError::DataLoss);
                    }
                    Ok(None)
                } else {
                    // Count discarded bytes so the next flag reports them.
                    self.current_frame_size += 1;
                    Ok(None)
                }
            }
            State::InFrame => {
                if byte == FLAG {
                    return self.frame_boundary();
                }
                if byte == ESCAPE {
                    self.state = State::FrameEscape;
                } else {
                    self.append_byte(byte);
                }
                Ok(None)
            }
            State::FrameEscape => {
                if byte == FLAG {
                    // The flag byte cannot be escaped.
                    self.start_frame();
                    return Err(DecodeError::DataLoss);
                }
                if byte == ESCAPE {
                    // Two escapes in a row invalidate the frame; the error
                    // is reported when the closing flag arrives.
                    self.state = State::InterFrame;
                    self.current_frame_size += 1;
                } else {
                    self.state = State::InFrame;
                    self.append_byte(byte ^ ESCAPE_MASK);
                }
                Ok(None)
            }
        }
    }

    /// Handles a flag byte while in-frame: validates and parses whatever
    /// content accumulated, then re-arms for the next frame (the closing
    /// flag of one frame may open the next).
    fn frame_boundary(&mut self) -> Result<Option<Frame>, DecodeError> {
        let result = match self.check_frame() {
            Ok(false) => Ok(None),
            Ok(true) => self.parse().map(Some),
            Err(err) => Err(err),
        };
        self.start_frame();
        result
    }

    fn check_frame(&self) -> Result<bool, DecodeError> {
        // Repeated flag bytes are legal; there is simply no frame yet.
        if self.current_frame_size == 0 {
            return Ok(false);
        }
        if self.current_frame_size < MIN_CONTENT_SIZE {
            return Err(DecodeError::DataLoss);
        }
        if !self.verify_frame_check_sequence() {
            return Err(DecodeError::DataLoss);
        }
        if self.current_frame_size > self.buffer.len() {
            return Err(DecodeError::ResourceExhausted);
        }
        Ok(true)
    }

    fn verify_frame_check_sequence(&self) -> bool {
        // De-ring the last four content bytes, which now hold the FCS.
        let mut tail = [0u8; FCS_SIZE];
        let mut index = self.last_read_byte_index;
        for slot in tail.iter_mut() {
            *slot = self.last_read_bytes[index];
            index = (index + 1) % FCS_SIZE;
        }
        LittleEndian::read_u32(&tail) == self.fcs.clone().finalize()
    }

    fn parse(&self) -> Result<Frame, DecodeError> {
        let content = &self.buffer[..self.current_frame_size];
        let (address, address_size) =
            varint::decode(content, Format::OneTerminatedLeastSignificant)
                .ok_or(DecodeError::DataLoss)?;
        let data_size = content
            .len()
            .checked_sub(address_size + CONTROL_SIZE + FCS_SIZE)
            .ok_or(DecodeError::DataLoss)?;

        let control = content[address_size];
        let start = address_size + CONTROL_SIZE;
        Ok(Frame::new(
            address,
            control,
            content[start..start + data_size].to_vec(),
        ))
    }

    fn append_byte(&mut self, byte: u8) {
        if self.buffer.len() < MAX_FRAME_SIZE {
            self.buffer.push(byte);
        }
        if self.current_frame_size >= FCS_SIZE {
            // The ring is full; the ejected byte is outside the trailing
            // FCS window and belongs to the checksummed region.
            let ejected = self.last_read_bytes[self.last_read_byte_index];
            self.fcs.update(&[ejected]);
        }
        self.last_read_bytes[self.last_read_byte_index] = byte;
        self.last_read_byte_index = (self.last_read_byte_index + 1) % FCS_SIZE;
        self.current_frame_size += 1;
    }

    /// Clears the accumulators and enters the in-frame state.
    fn start_frame(&mut self) {
        self.buffer.clear();
        self.current_frame_size = 0;
        self.last_read_byte_index = 0;
        self.fcs = Hasher::new();
        self.state = State::InFrame;
    }

    fn reset(&mut self) {
        self.start_frame();
        self.state = State::InterFrame;
    }
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    /// Reads from the source until one frame decodes.
    ///
    /// Returns on the first byte that completes a frame or raises an error.
    ///
    /// # Returns
    ///
    /// The next validated frame, or the first framing error; failed
    /// transport reads (including end of stream) surface as
    /// [`DecodeError::DataLoss`].
    pub async fn decode(&mut self) -> Result<Frame, DecodeError> {
        loop {
            let byte = match self.reader.read_u8().await {
                Ok(byte) => byte,
                Err(_) => {
                    self.reset();
                    return Err(DecodeError::DataLoss);
                }
            };
            if let Some(frame) = self.process(byte)? {
                return Ok(frame);
            }
        }
    }
}
