//! One framed connection.
//!
//! A [`Conn`] owns a bidirectional byte stream together with one HDLC
//! encoder and one HDLC decoder, and routes inbound frames by address:
//! frames on [`RPC_ADDRESS`](super::RPC_ADDRESS) are unmarshalled as
//! [`RpcPacket`]s and handed to a [`PacketHandler`], frames on
//! [`LOG_ADDRESS`](super::LOG_ADDRESS) are rendered to stderr, anything
//! else is a [`RpcError::BadAddress`].

use std::sync::Arc;

use async_trait::async_trait;
use prost::Message;
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::protocol::hdlc::{Decoder, Encoder};

use super::{RpcError, RpcPacket, LOG_ADDRESS, RPC_ADDRESS};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Receives the RPC packets decoded from a connection's frames.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Dispatches one inbound packet.
    ///
    /// # Arguments
    ///
    /// * `conn` - The connection the packet arrived on; handlers use it to
    ///   send replies or to hand out to per-call streams.
    /// * `packet` - The decoded packet.
    ///
    /// # Returns
    ///
    /// `Ok(())` to keep reading; an error terminates the connection's read
    /// loop.
    async fn handle_packet(&self, conn: &Arc<Conn>, packet: RpcPacket) -> Result<(), RpcError>;
}

/// A framed RPC connection over any in-order byte stream.
pub struct Conn {
    encoder: Mutex<Encoder<BoxedWriter>>,
    decoder: Mutex<Decoder<BoxedReader>>,
    cancel: CancellationToken,
}

impl Conn {
    /// Wraps a bidirectional byte stream in a framed RPC connection.
    ///
    /// # Arguments
    ///
    /// * `stream` - Any in-order reliable byte transport: a TCP socket, a
    ///   serial port, or an in-memory pipe in tests.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = io::split(stream);
        Self {
            encoder: Mutex::new(Encoder::new(
                Box::new(write_half) as BoxedWriter,
                RPC_ADDRESS,
            )),
            decoder: Mutex::new(Decoder::new(Box::new(read_half) as BoxedReader)),
            cancel: CancellationToken::new(),
        }
    }

    /// Drives the read loop, dispatching RPC packets to `handler`.
    ///
    /// The caller's task becomes the connection's single reader.
    ///
    /// # Arguments
    ///
    /// * `handler` - Receives every packet decoded from an RPC-address
    ///   frame.
    ///
    /// # Returns
    ///
    /// The error that ended the loop: `Cancelled` after [`Conn::close`], a
    /// framing or packet-decode error, [`RpcError::BadAddress`] for a
    /// frame on an unserved address, or the handler's failure.
    pub async fn recv(self: Arc<Self>, handler: &dyn PacketHandler) -> Result<(), RpcError> {
        let mut decoder = self.decoder.lock().await;
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
                frame = decoder.decode() => frame?,
            };
            match frame.address() {
                RPC_ADDRESS => {
                    let packet = RpcPacket::decode(frame.payload())?;
                    trace!(
                        "received packet type {} service {:#010x} method {:#010x}",
                        packet.packet_type,
                        packet.service_id,
                        packet.method_id
                    );
                    handler.handle_packet(&self, packet).await?;
                }
                LOG_ADDRESS => {
                    eprintln!("Pigweed Log: {}", String::from_utf8_lossy(frame.payload()));
                }
                address => return Err(RpcError::BadAddress(address)),
            }
        }
    }

    /// Marshals `packet` and writes it as a single HDLC frame.
    ///
    /// Safe to call from any number of tasks; the encoder lock serializes
    /// them, so packets hit the wire in `send` call order.
    ///
    /// # Arguments
    ///
    /// * `packet` - The packet to marshal onto the RPC address.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the frame is written, [`RpcError::Closed`] after
    /// [`Conn::close`], or the transport write error.
    pub async fn send(&self, packet: &RpcPacket) -> Result<(), RpcError> {
        let payload = packet.encode_to_vec();
        let mut encoder = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RpcError::Closed),
            encoder = self.encoder.lock() => encoder,
        };
        if self.cancel.is_cancelled() {
            return Err(RpcError::Closed);
        }
        encoder.encode(&payload).await?;
        Ok(())
    }

    /// Closes the connection: the read loop exits and subsequent operations
    /// return [`RpcError::Closed`] / [`RpcError::Cancelled`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the connection has been closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}
