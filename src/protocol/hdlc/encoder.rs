use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::varint::{self, Format};

use super::{needs_escaping, ESCAPE, ESCAPE_MASK, FCS_SIZE, FLAG, UNNUMBERED_UFRAME};

/// Writes escaped, CRC-suffixed HDLC frames to a byte sink.
///
/// Every frame carries the encoder's fixed source address and the
/// unnumbered-frame control byte. The whole escaped frame is staged in
/// memory and flushed with a single write, so frames from concurrent
/// senders (serialized one level up) never interleave on the wire.
pub struct Encoder<W> {
    writer: W,
    address: u64,
    staging: Vec<u8>,
}

impl<W> Encoder<W> {
    /// Creates an encoder that frames payloads for one source address.
    ///
    /// # Arguments
    ///
    /// * `writer` - Byte sink the frames are written to.
    /// * `address` - HDLC address stamped on every frame.
    pub fn new(writer: W, address: u64) -> Self {
        Self {
            writer,
            address,
            staging: Vec::new(),
        }
    }

    /// Consumes the encoder, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin> Encoder<W> {
    /// Encodes `payload` as one frame and writes it out.
    ///
    /// The frame check sequence restarts for every frame and covers the
    /// unescaped address varint, control byte and payload. The FCS bytes
    /// themselves are escaped on the wire but not folded back into the
    /// checksum.
    ///
    /// # Arguments
    ///
    /// * `payload` - Raw frame body; flag and escape bytes in it are
    ///   escaped on the wire.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the frame is flushed, or the first write error from
    /// the underlying sink, unchanged.
    pub async fn encode(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let mut fcs = Hasher::new();
        self.staging.clear();
        self.staging.push(FLAG);

        let address = varint::encode(self.address, Format::OneTerminatedLeastSignificant);
        fcs.update(&address);
        for &byte in address.iter() {
            push_escaped(&mut self.staging, byte);
        }

        fcs.update(&[UNNUMBERED_UFRAME]);
        push_escaped(&mut self.staging, UNNUMBERED_UFRAME);

        fcs.update(payload);
        for &byte in payload {
            push_escaped(&mut self.staging, byte);
        }

        let mut fcs_bytes = [0u8; FCS_SIZE];
        LittleEndian::write_u32(&mut fcs_bytes, fcs.finalize());
        for &byte in &fcs_bytes {
            push_escaped(&mut self.staging, byte);
        }

        self.staging.push(FLAG);

        self.writer.write_all(&self.staging).await?;
        self.writer.flush().await
    }
}

fn push_escaped(buffer: &mut Vec<u8>, byte: u8) {
    if needs_escaping(byte) {
        buffer.push(ESCAPE);
        buffer.push(byte ^ ESCAPE_MASK);
    } else {
        buffer.push(byte);
    }
}
