//! Logical call streams and their registry.
//!
//! Every in-flight RPC call is a [`Stream`]: an identity key, a handle to
//! its connection, a single-slot queue the dispatcher pushes inbound
//! packets onto, and a cancellation scope. The [`StreamManager`] maps
//! `(service_id, method_id)` keys to live streams; an entry exists exactly
//! while the call is registered, and packets arriving outside that window
//! are dropped by the dispatcher with a diagnostic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::conn::Conn;
use super::hash::StreamKey;
use super::packet::{PacketType, RpcPacket, StatusCode};
use super::{RpcError, CHANNEL_ID};

/// Which sides of a call stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodDescriptor {
    pub const UNARY: Self = Self {
        client_streaming: false,
        server_streaming: false,
    };
    pub const SERVER_STREAMING: Self = Self {
        client_streaming: false,
        server_streaming: true,
    };
    pub const CLIENT_STREAMING: Self = Self {
        client_streaming: true,
        server_streaming: false,
    };
    pub const BIDIRECTIONAL: Self = Self {
        client_streaming: true,
        server_streaming: true,
    };
}

/// One in-flight RPC call on a connection.
///
/// The dispatcher pushes inbound packets onto a single-slot queue and the
/// caller's task blocks in [`Stream::recv`]; a slow consumer therefore
/// back-pressures the connection's reader. Closing the call fires its
/// cancellation scope, which promptly unblocks both sides.
pub struct Stream {
    key: StreamKey,
    desc: MethodDescriptor,
    conn: Arc<Conn>,
    packets: mpsc::Sender<RpcPacket>,
    queue: tokio::sync::Mutex<mpsc::Receiver<RpcPacket>>,
    cancel: CancellationToken,
}

impl Stream {
    /// Creates a call stream bound to one connection.
    ///
    /// # Arguments
    ///
    /// * `conn` - Connection the call's packets travel on.
    /// * `key` - The call's `(service_id, method_id)` identity.
    /// * `desc` - Which sides of the call stream.
    pub fn new(conn: Arc<Conn>, key: StreamKey, desc: MethodDescriptor) -> Arc<Self> {
        let (packets, queue) = mpsc::channel(1);
        Arc::new(Self {
            key,
            desc,
            conn,
            packets,
            queue: tokio::sync::Mutex::new(queue),
            cancel: CancellationToken::new(),
        })
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub fn descriptor(&self) -> MethodDescriptor {
        self.desc
    }

    /// Marshals `msg` and sends it as one packet carrying this call's
    /// identity on the default channel.
    ///
    /// # Arguments
    ///
    /// * `msg` - User message serialized into the packet payload.
    /// * `status` - Status stamped on the packet; `Ok` except on error
    ///   packets.
    /// * `packet_type` - Kind of packet to emit.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the connection accepted the packet, or the
    /// connection's send error.
    pub async fn send<M: Message>(
        &self,
        msg: &M,
        status: StatusCode,
        packet_type: PacketType,
    ) -> Result<(), RpcError> {
        self.send_payload(msg.encode_to_vec(), status, packet_type)
            .await
    }

    /// Sends one packet with an empty payload.
    ///
    /// # Arguments
    ///
    /// * `status` - Status stamped on the packet.
    /// * `packet_type` - Kind of packet to emit; used for the empty-body
    ///   open, completion and error packets.
    pub async fn send_empty(
        &self,
        status: StatusCode,
        packet_type: PacketType,
    ) -> Result<(), RpcError> {
        self.send_payload(Vec::new(), status, packet_type).await
    }

    async fn send_payload(
        &self,
        payload: Vec<u8>,
        status: StatusCode,
        packet_type: PacketType,
    ) -> Result<(), RpcError> {
        let packet = RpcPacket::new(packet_type, self.key, payload, status);
        self.conn.send(&packet).await
    }

    /// Blocks until the next packet for this call arrives, or until the
    /// call is cancelled.
    ///
    /// # Returns
    ///
    /// The next inbound packet, [`RpcError::Cancelled`] once the call is
    /// closed, or [`RpcError::InvalidPacket`] for a packet whose
    /// `(channel_id, service_id, method_id)` does not match this call;
    /// rejection leaves the stream usable.
    pub async fn recv(&self) -> Result<RpcPacket, RpcError> {
        let mut queue = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
            queue = self.queue.lock() => queue,
        };
        let packet = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
            packet = queue.recv() => packet.ok_or(RpcError::Cancelled)?,
        };

        if packet.channel_id != CHANNEL_ID
            || packet.service_id != self.key.service_id
            || packet.method_id != self.key.method_id
        {
            return Err(RpcError::InvalidPacket {
                channel_id: packet.channel_id,
                service_id: packet.service_id,
                method_id: packet.method_id,
            });
        }
        Ok(packet)
    }

    /// Called by the dispatcher for each inbound packet addressed to this
    /// call.
    ///
    /// Blocks while the consumer has not drained the previous packet,
    /// back-propagating to the transport; gives up without blocking
    /// forever if the call is closed concurrently.
    ///
    /// # Arguments
    ///
    /// * `packet` - Inbound packet already matched to this call's key by
    ///   the dispatcher.
    pub async fn packet_received(&self, packet: RpcPacket) {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("dropping packet for closed call {:?}", self.key);
            }
            result = self.packets.send(packet) => {
                if result.is_err() {
                    debug!("dropping packet for finished call {:?}", self.key);
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the call; blocked receivers return [`RpcError::Cancelled`]
    /// promptly.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Registry of live calls keyed by `(service_id, method_id)`.
///
/// Looked up on the connection's reader task and mutated from caller
/// tasks, so the map sits behind a lock.
#[derive(Default)]
pub struct StreamManager {
    streams: Mutex<HashMap<StreamKey, Arc<Stream>>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call.
    ///
    /// A live call under the same key is closed and replaced; concurrent
    /// calls to one method are not supported.
    ///
    /// # Arguments
    ///
    /// * `stream` - The call to register under its own key.
    pub fn add(&self, stream: Arc<Stream>) {
        let evicted = self
            .streams
            .lock()
            .expect("unable to lock stream map")
            .insert(stream.key(), stream);
        if let Some(evicted) = evicted {
            warn!("replacing live call {:?}", evicted.key());
            evicted.close();
        }
    }

    /// Looks up the live call for a packet's ids.
    ///
    /// # Arguments
    ///
    /// * `service_id` - Hash of the service name.
    /// * `method_id` - Hash of the method name.
    ///
    /// # Returns
    ///
    /// The registered call, or `None` when no call owns that key.
    pub fn get(&self, service_id: u32, method_id: u32) -> Option<Arc<Stream>> {
        self.streams
            .lock()
            .expect("unable to lock stream map")
            .get(&StreamKey::from_ids(service_id, method_id))
            .cloned()
    }

    /// Closes `stream` and removes its entry.
    ///
    /// The entry is only removed while it still refers to `stream`, so a
    /// newer call that reused the key is left untouched.
    ///
    /// # Arguments
    ///
    /// * `stream` - The call to close; its entry is matched by pointer
    ///   identity, not just by key.
    pub fn remove(&self, stream: &Arc<Stream>) {
        stream.close();
        let mut streams = self.streams.lock().expect("unable to lock stream map");
        if streams
            .get(&stream.key())
            .is_some_and(|current| Arc::ptr_eq(current, stream))
        {
            streams.remove(&stream.key());
        }
    }

    /// Closes and removes every call that was created on `conn`.
    ///
    /// Streams referring to a closed connection cannot make progress, so a
    /// connection's teardown path must call this to unpark any worker still
    /// blocked on one of its calls. Calls on other connections are left
    /// untouched.
    ///
    /// # Arguments
    ///
    /// * `conn` - The connection being torn down; entries are matched by
    ///   pointer identity against each stream's owning connection.
    pub fn close_for_conn(&self, conn: &Arc<Conn>) {
        let mut closed = Vec::new();
        {
            let mut streams = self.streams.lock().expect("unable to lock stream map");
            streams.retain(|_, stream| {
                if Arc::ptr_eq(&stream.conn, conn) {
                    closed.push(stream.clone());
                    false
                } else {
                    true
                }
            });
        }
        for stream in closed {
            stream.close();
        }
    }

    /// Closes and removes every call; used when a connection dies.
    pub fn reset(&self) {
        let streams: Vec<_> = self
            .streams
            .lock()
            .expect("unable to lock stream map")
            .drain()
            .map(|(_, stream)| stream)
            .collect();
        for stream in streams {
            stream.close();
        }
    }
}
