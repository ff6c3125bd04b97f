//! Wire representation of RPC packets (the `pw.rpc.internal.RpcPacket`
//! protobuf message).
//!
//! The structs carry the same prost annotations `prost-build` would emit
//! for the upstream proto definition, so the wire format is plain proto3.

use super::hash::StreamKey;
use super::CHANNEL_ID;

/// Direction and kind of an RPC packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PacketType {
    Request = 0,
    Response = 1,
    ClientStream = 2,
    ServerStream = 3,
    ClientError = 4,
    ServerError = 5,
    ClientRequestCompletion = 6,
}

/// Status carried in a packet's `status` field; mirrors the pw_rpc (gRPC)
/// status space. `Ok` on success, anything else on error packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

/// One RPC packet, carried as the payload of an HDLC frame on the RPC
/// address.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcPacket {
    #[prost(enumeration = "PacketType", tag = "1")]
    pub packet_type: i32,
    #[prost(uint32, tag = "2")]
    pub channel_id: u32,
    #[prost(uint32, tag = "3")]
    pub service_id: u32,
    #[prost(uint32, tag = "4")]
    pub method_id: u32,
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
    #[prost(enumeration = "StatusCode", tag = "6")]
    pub status: i32,
}

impl RpcPacket {
    /// Builds a packet for `key` on the default channel.
    ///
    /// # Arguments
    ///
    /// * `packet_type` - Direction and kind of the packet.
    /// * `key` - Call identity the packet's service and method ids are
    ///   taken from.
    /// * `payload` - Protobuf-encoded user message, or empty.
    /// * `status` - `Ok` for normal traffic, the error code on error
    ///   packets.
    pub fn new(packet_type: PacketType, key: StreamKey, payload: Vec<u8>, status: StatusCode) -> Self {
        Self {
            packet_type: packet_type as i32,
            channel_id: CHANNEL_ID,
            service_id: key.service_id,
            method_id: key.method_id,
            payload,
            status: status as i32,
        }
    }

    /// Typed view of the `type` field; `None` for unknown discriminants.
    pub fn packet_type_checked(&self) -> Option<PacketType> {
        PacketType::try_from(self.packet_type).ok()
    }

    /// Typed view of the `status` field; `None` for unknown discriminants.
    pub fn status_checked(&self) -> Option<StatusCode> {
        StatusCode::try_from(self.status).ok()
    }
}
