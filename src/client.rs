//! RPC client.
//!
//! A [`Client`] dials a remote endpoint, keeps the connection and its
//! reader task alive (redialing with a fixed backoff when the transport
//! drops), and exposes the two call entry points: unary
//! [`Client::invoke`] and streaming [`Client::call`].
//!
//! Inbound packets are dispatched by `(service_id, method_id)` to the call
//! that owns them; packets for unknown calls are logged and dropped. When
//! the read loop exits, every outstanding call is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::rpc::{
    Conn, MethodDescriptor, PacketHandler, PacketType, RpcError, RpcPacket, StatusCode, Stream,
    StreamKey, StreamManager,
};

/// Delay between redial attempts.
const REDIAL_BACKOFF: Duration = Duration::from_secs(1);

/// A pw_rpc client for one remote endpoint.
///
/// Cheap to clone; all clones share the connection and the call registry.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    endpoint: String,
    conn: Mutex<Option<Arc<Conn>>>,
    streams: StreamManager,
    cancel: CancellationToken,
}

impl Client {
    /// Creates a client for a remote endpoint. Nothing is dialed until the
    /// first call.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Target address in the form `host:port`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                endpoint: endpoint.into(),
                conn: Mutex::new(None),
                streams: StreamManager::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Ensures a live connection, dialing with a fixed backoff until the
    /// client is closed. Idempotent; concurrent callers share one dial.
    ///
    /// # Returns
    ///
    /// The live connection, or [`RpcError::Cancelled`] once the client is
    /// closed.
    pub async fn connect(&self) -> Result<Arc<Conn>, RpcError> {
        let shared = &self.shared;
        let mut guard = shared.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
            // The reader task hit an error; dial again.
            *guard = None;
        }

        let socket = loop {
            if shared.cancel.is_cancelled() {
                return Err(RpcError::Cancelled);
            }
            match TcpStream::connect(&shared.endpoint).await {
                Ok(socket) => break socket,
                Err(err) => {
                    debug!("dial {} failed: {err}; retrying", shared.endpoint);
                    tokio::select! {
                        _ = shared.cancel.cancelled() => return Err(RpcError::Cancelled),
                        _ = tokio::time::sleep(REDIAL_BACKOFF) => {}
                    }
                }
            }
        };
        let _ = socket.set_nodelay(true);
        info!("connected to {}", shared.endpoint);

        let conn = Arc::new(Conn::new(socket));
        *guard = Some(conn.clone());
        drop(guard);

        let task_shared = shared.clone();
        let task_conn = conn.clone();
        tokio::spawn(async move {
            if let Err(err) = task_conn.clone().recv(task_shared.as_ref()).await {
                info!("server disconnect: {err}");
            }
            task_conn.close();
            {
                let mut guard = task_shared.conn.lock().await;
                if guard
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &task_conn))
                {
                    *guard = None;
                }
            }
            // Calls referring to a dead connection cannot make progress.
            task_shared.streams.reset();
        });

        Ok(conn)
    }

    /// Invokes a unary method: one `REQUEST` out, one reply packet back.
    ///
    /// The call is registered for exactly the duration of the round trip.
    ///
    /// # Arguments
    ///
    /// * `method` - Full method name of the form `/Service/Method`.
    /// * `args` - Request message marshalled into the `REQUEST` packet.
    ///
    /// # Returns
    ///
    /// The decoded reply message, or an [`RpcError::Remote`] carrying the
    /// status the server answered with.
    pub async fn invoke<Req, Res>(&self, method: &str, args: &Req) -> Result<Res, RpcError>
    where
        Req: Message,
        Res: Message + Default,
    {
        let conn = self.connect().await?;
        let key = StreamKey::for_method(method)?;
        let stream = Stream::new(conn, key, MethodDescriptor::UNARY);
        self.shared.streams.add(stream.clone());
        let result = unary_round_trip(&stream, args).await;
        self.shared.streams.remove(&stream);
        result
    }

    /// Starts a streaming call.
    ///
    /// # Arguments
    ///
    /// * `method` - Full method name of the form `/Service/Method`.
    /// * `desc` - Which sides of the call stream.
    ///
    /// # Returns
    ///
    /// The registered call's client-side handle.
    pub async fn call(&self, method: &str, desc: MethodDescriptor) -> Result<ClientCall, RpcError> {
        let conn = self.connect().await?;
        let key = StreamKey::for_method(method)?;
        let stream = Stream::new(conn, key, desc);
        self.shared.streams.add(stream.clone());
        Ok(ClientCall {
            stream,
            client: self.shared.clone(),
            opened: false,
            send_closed: false,
        })
    }

    /// Closes the connection and cancels every outstanding call.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let mut guard = self.shared.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close();
        }
        drop(guard);
        self.shared.streams.reset();
    }
}

async fn unary_round_trip<Req, Res>(stream: &Stream, args: &Req) -> Result<Res, RpcError>
where
    Req: Message,
    Res: Message + Default,
{
    stream
        .send(args, StatusCode::Ok, PacketType::Request)
        .await?;
    let packet = stream.recv().await?;
    reply_message(&packet)
}

/// Decodes a reply packet, surfacing error packets and non-OK statuses as
/// typed errors.
fn reply_message<Res: Message + Default>(packet: &RpcPacket) -> Result<Res, RpcError> {
    check_reply(packet)?;
    Ok(Res::decode(packet.payload.as_slice())?)
}

fn check_reply(packet: &RpcPacket) -> Result<(), RpcError> {
    if packet.packet_type_checked() == Some(PacketType::ServerError) {
        return Err(RpcError::Remote(
            packet.status_checked().unwrap_or(StatusCode::Unknown),
        ));
    }
    match packet.status_checked() {
        Some(StatusCode::Ok) => Ok(()),
        code => Err(RpcError::Remote(code.unwrap_or(StatusCode::Unknown))),
    }
}

#[async_trait]
impl PacketHandler for ClientShared {
    async fn handle_packet(&self, _conn: &Arc<Conn>, packet: RpcPacket) -> Result<(), RpcError> {
        match packet.packet_type_checked() {
            Some(
                PacketType::Response | PacketType::ServerStream | PacketType::ServerError,
            ) => match self.streams.get(packet.service_id, packet.method_id) {
                Some(stream) => {
                    stream.packet_received(packet).await;
                    Ok(())
                }
                None => {
                    warn!(
                        "no call for packet: service {:#010x} method {:#010x}; dropping",
                        packet.service_id, packet.method_id
                    );
                    Ok(())
                }
            },
            // The server must never send client-direction packets.
            _ => Err(RpcError::UnexpectedPacketType(packet.packet_type)),
        }
    }
}

/// Client-side handle for one streaming call.
///
/// For client-streaming calls, the first [`ClientCall::send_msg`] opens
/// the call with an empty-body `REQUEST` before the message itself goes
/// out as a `CLIENT_STREAM`. Dropping the handle unregisters and cancels
/// the call.
pub struct ClientCall {
    stream: Arc<Stream>,
    client: Arc<ClientShared>,
    opened: bool,
    send_closed: bool,
}

impl ClientCall {
    /// Sends one request message.
    ///
    /// # Arguments
    ///
    /// * `msg` - Message to send: a `REQUEST` on unary and
    ///   server-streaming calls, a `CLIENT_STREAM` on client-streaming
    ///   calls.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the packet is out, or [`RpcError::SendClosed`] after
    /// [`ClientCall::close_send`].
    pub async fn send_msg<M: Message>(&mut self, msg: &M) -> Result<(), RpcError> {
        if self.send_closed {
            return Err(RpcError::SendClosed);
        }
        if self.stream.descriptor().client_streaming {
            if !self.opened {
                self.opened = true;
                self.stream
                    .send_empty(StatusCode::Ok, PacketType::Request)
                    .await?;
            }
            return self
                .stream
                .send(msg, StatusCode::Ok, PacketType::ClientStream)
                .await;
        }
        self.stream
            .send(msg, StatusCode::Ok, PacketType::Request)
            .await
    }

    /// Half-closes the send side.
    ///
    /// On client-streaming calls this tells the server no further request
    /// messages will follow. Calling it twice is an error.
    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        if self.send_closed {
            return Err(RpcError::SendClosed);
        }
        self.send_closed = true;
        if self.stream.descriptor().client_streaming {
            return self
                .stream
                .send_empty(StatusCode::Ok, PacketType::ClientRequestCompletion)
                .await;
        }
        Ok(())
    }

    /// Receives the next reply.
    ///
    /// The call is closed at end-of-stream and on every terminal error.
    ///
    /// # Returns
    ///
    /// On server-streaming calls, `Ok(Some(msg))` per `SERVER_STREAM`
    /// packet and `Ok(None)` once the server finishes the call with its
    /// closing `RESPONSE`; on unary calls, the single reply as
    /// `Ok(Some(msg))`. Error packets and non-OK statuses surface as
    /// [`RpcError::Remote`].
    pub async fn recv_msg<M: Message + Default>(&mut self) -> Result<Option<M>, RpcError> {
        if !self.stream.descriptor().server_streaming {
            let result = self.stream.recv().await.and_then(|packet| {
                reply_message(&packet).map(Some)
            });
            if result.is_err() {
                self.finish();
            }
            return result;
        }

        let packet = match self.stream.recv().await {
            Ok(packet) => packet,
            Err(err) => {
                self.finish();
                return Err(err);
            }
        };
        match packet.packet_type_checked() {
            Some(PacketType::ServerStream) => match M::decode(packet.payload.as_slice()) {
                Ok(msg) => Ok(Some(msg)),
                Err(err) => {
                    self.finish();
                    Err(err.into())
                }
            },
            Some(PacketType::Response) => {
                self.finish();
                match packet.status_checked() {
                    Some(StatusCode::Ok) => Ok(None),
                    code => Err(RpcError::Remote(code.unwrap_or(StatusCode::Unknown))),
                }
            }
            Some(PacketType::ServerError) => {
                self.finish();
                Err(RpcError::Remote(
                    packet.status_checked().unwrap_or(StatusCode::Unknown),
                ))
            }
            _ => {
                self.finish();
                Err(RpcError::UnexpectedPacketType(packet.packet_type))
            }
        }
    }

    /// Cancels the call from the user side: notifies the server with
    /// `CLIENT_ERROR` carrying status `CANCELLED`, then closes the call.
    pub async fn cancel(&mut self) -> Result<(), RpcError> {
        let result = self
            .stream
            .send_empty(StatusCode::Cancelled, PacketType::ClientError)
            .await;
        self.finish();
        result
    }

    /// Closes the call; any task blocked receiving on it returns
    /// [`RpcError::Cancelled`] promptly.
    pub fn close(&mut self) {
        self.finish();
    }

    fn finish(&self) {
        self.client.streams.remove(&self.stream);
    }
}

impl Drop for ClientCall {
    fn drop(&mut self) {
        self.finish();
    }
}
