//! Protocol module implements the wire layers of the pw_rpc protocol stack.
//!
//! Three components, leaves first:
//!
//! - `varint`: the multi-format variable-length integer encoding used for
//!   the HDLC address field.
//!
//! - `hdlc`: HDLC-like framing with byte escaping and a CRC-32 frame check
//!   sequence, providing message boundaries over stream transports.
//!
//! - `rpc`: the RPC engine: the protobuf packet record, method-name
//!   hashing, framed connections and the call streams multiplexed over
//!   them.

pub mod hdlc;
pub mod rpc;
pub mod varint;
