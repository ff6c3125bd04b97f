//! pw-rpc - a host-side client and server for the Pigweed RPC protocol
//!
//! This library lets a host process invoke remote procedures on an embedded
//! target (and serve procedures to one) over any reliable byte stream. RPC
//! packets are protobuf records framed with HDLC-style escaping and CRC-32
//! frame check sequences; calls are multiplexed over one connection by
//! hashed `(service, method)` identity.
//!
//! ## Supported Features
//!
//! - Unary, server-streaming, client-streaming and bidirectional calls
//! - HDLC framing codec with escaping, CRC validation and error recovery
//! - Multi-format varint codec for the HDLC address field
//! - Bit-exact pw_rpc method-name hashing (65599 coefficient)
//! - Host-log frames rendered to stderr alongside RPC traffic
//! - Asynchronous operation with the Tokio runtime
//!
//! ## Main Components
//!
//! - `client`: The [`Client`] entry points - dial/redial handling, unary
//!   `invoke` and the streaming call handle.
//!
//! - `server`: The [`Server`] - a TCP listener, the service registry, and
//!   server-side stream handles.
//!
//! - `protocol`: The wire layers: varint and HDLC codecs and the RPC
//!   engine (packet codec, connections, call streams).
//!
//! ## Usage
//!
//! Register [`ServiceDesc`]s on a [`Server`] and call them from a
//! [`Client`] using full method names of the form `/Service/Method`; both
//! ends derive the numeric ids from the same strings.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientCall};
pub use protocol::rpc::{MethodDescriptor, RpcError, StatusCode};
pub use server::{Server, ServerStream, ServiceDesc};
