//! RPC engine: packet codec, method identity, framed connections and call
//! streams.
//!
//! Packets are protobuf records carried inside HDLC frames on a reserved
//! address. A [`Conn`] owns one byte stream and routes inbound packets to a
//! [`PacketHandler`]; each in-flight call is a [`Stream`] registered in a
//! [`StreamManager`] under its `(service_id, method_id)` key.

pub mod conn;
pub mod hash;
pub mod packet;
pub mod stream;

pub use conn::{Conn, PacketHandler};
pub use hash::{hash, StreamKey};
pub use packet::{PacketType, RpcPacket, StatusCode};
pub use stream::{MethodDescriptor, Stream, StreamManager};

/// HDLC address carrying RPC packets (`'R'`).
pub const RPC_ADDRESS: u64 = b'R' as u64;
/// HDLC address carrying plain-text logs from the remote end.
pub const LOG_ADDRESS: u64 = 1;
/// The single RPC channel id used on the wire.
pub const CHANNEL_ID: u32 = 1;

/// Errors surfaced by the RPC engine.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The operation's cancellation scope fired.
    #[error("cancelled")]
    Cancelled,
    /// The connection is closed; no further traffic is possible.
    #[error("connection closed")]
    Closed,
    /// A frame arrived on an HDLC address this endpoint does not serve.
    #[error("bad HDLC address {0:#x}")]
    BadAddress(u64),
    /// A packet reached a stream whose identity it does not match.
    #[error("invalid packet for stream: channel {channel_id}, service {service_id:#010x}, method {method_id:#010x}")]
    InvalidPacket {
        channel_id: u32,
        service_id: u32,
        method_id: u32,
    },
    /// A packet type arrived that is invalid for this endpoint's direction.
    #[error("unexpected packet type {0}")]
    UnexpectedPacketType(i32),
    /// Full method names must look like `/Service/Method`.
    #[error("invalid full method name {0:?}")]
    InvalidMethodName(String),
    /// The remote end finished the call with a non-OK status.
    #[error("remote error: {0:?}")]
    Remote(StatusCode),
    /// The send side of the call was already closed.
    #[error("send side already closed")]
    SendClosed,
    /// Framing-level failure on the receive path.
    #[error(transparent)]
    Frame(#[from] crate::protocol::hdlc::DecodeError),
    /// Malformed protobuf inside an RPC frame.
    #[error("packet decode: {0}")]
    PacketDecode(#[from] prost::DecodeError),
    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
