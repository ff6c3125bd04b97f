//! RPC server.
//!
//! A [`Server`] listens for transport connections, wraps each in a framed
//! connection with itself as the packet handler, and dispatches inbound
//! `REQUEST` packets through a service registry indexed by name hash.
//! Unary methods run inline on the reader; streaming methods get a
//! registered [`ServerStream`] and run on their own worker task, closing
//! with a final empty-body `RESPONSE` that carries the call's status.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use prost::Message;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::rpc::{
    hash, Conn, MethodDescriptor, PacketHandler, PacketType, RpcError, RpcPacket, StatusCode,
    Stream, StreamKey, StreamManager,
};

/// Future returned by method handlers.
pub type HandlerFuture<T> = BoxFuture<'static, Result<T, StatusCode>>;

/// A unary method handler: request payload bytes in, response payload
/// bytes out.
pub type UnaryHandler = Arc<dyn Fn(Vec<u8>) -> HandlerFuture<Vec<u8>> + Send + Sync>;

/// A streaming method handler. Receives the call's [`ServerStream`] and
/// the payload of the opening `REQUEST` packet.
pub type StreamingHandler = Arc<dyn Fn(ServerStream, Vec<u8>) -> HandlerFuture<()> + Send + Sync>;

/// Description of one service: its fully-qualified name plus unary and
/// streaming method handlers.
pub struct ServiceDesc {
    name: String,
    methods: Vec<(String, UnaryHandler)>,
    streams: Vec<(String, MethodDescriptor, StreamingHandler)>,
}

impl ServiceDesc {
    /// Creates an empty service description.
    ///
    /// # Arguments
    ///
    /// * `name` - Fully-qualified service name; both ends hash it to the
    ///   same `service_id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a unary method operating on raw payload bytes.
    ///
    /// # Arguments
    ///
    /// * `method` - Bare method name.
    /// * `handler` - Maps the request payload to the response payload, or
    ///   to the status of a `SERVER_ERROR` reply.
    pub fn unary<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<u8>) -> HandlerFuture<Vec<u8>> + Send + Sync + 'static,
    {
        self.methods.push((method.into(), Arc::new(handler)));
        self
    }

    /// Adds a unary method from a typed async function; request decoding
    /// failures answer with `INVALID_ARGUMENT`.
    ///
    /// # Arguments
    ///
    /// * `method` - Bare method name.
    /// * `handler` - Async function from the decoded request message to
    ///   the response message.
    pub fn unary_fn<Req, Res, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        Req: Message + Default + 'static,
        Res: Message + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Res, StatusCode>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.unary(method, move |payload: Vec<u8>| {
            let handler = handler.clone();
            Box::pin(async move {
                let request =
                    Req::decode(payload.as_slice()).map_err(|_| StatusCode::InvalidArgument)?;
                let response = (*handler)(request).await?;
                Ok(response.encode_to_vec())
            })
        })
    }

    /// Adds a streaming method of the given shape.
    ///
    /// # Arguments
    ///
    /// * `method` - Bare method name.
    /// * `desc` - Which sides of the method stream.
    /// * `handler` - Drives the call on a worker task; receives the call's
    ///   [`ServerStream`] and the opening `REQUEST` payload, and its
    ///   result becomes the status of the closing `RESPONSE`.
    pub fn streaming<F>(
        mut self,
        method: impl Into<String>,
        desc: MethodDescriptor,
        handler: F,
    ) -> Self
    where
        F: Fn(ServerStream, Vec<u8>) -> HandlerFuture<()> + Send + Sync + 'static,
    {
        self.streams.push((method.into(), desc, Arc::new(handler)));
        self
    }
}

struct StreamMethod {
    desc: MethodDescriptor,
    handler: StreamingHandler,
}

struct ServiceInfo {
    name: String,
    methods: HashMap<u32, UnaryHandler>,
    streams: HashMap<u32, StreamMethod>,
}

enum Dispatch {
    Unary(UnaryHandler),
    Streaming(MethodDescriptor, StreamingHandler),
}

/// A pw_rpc server bound to a TCP endpoint.
pub struct Server {
    listener: TcpListener,
    shared: Arc<ServerShared>,
}

struct ServerShared {
    services: RwLock<HashMap<u32, ServiceInfo>>,
    streams: Arc<StreamManager>,
    cancel: CancellationToken,
    serving: AtomicBool,
}

impl Server {
    /// Binds the server to a local endpoint.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Listen address in the form `host:port`; port 0 picks
    ///   a free port, see [`Server::local_addr`].
    ///
    /// # Returns
    ///
    /// A Result containing either the bound [`Server`] or an IO error.
    pub async fn bind(endpoint: &str) -> io::Result<Server> {
        let listener = TcpListener::bind(endpoint).await?;
        info!("RPC server listening on {}", listener.local_addr()?);
        Ok(Server {
            listener,
            shared: Arc::new(ServerShared {
                services: RwLock::new(HashMap::new()),
                streams: Arc::new(StreamManager::new()),
                cancel: CancellationToken::new(),
                serving: AtomicBool::new(false),
            }),
        })
    }

    /// The address the server actually listens on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers a service, indexing its methods by name hash.
    ///
    /// # Arguments
    ///
    /// * `desc` - The service's name and method handlers.
    ///
    /// # Panics
    ///
    /// Registering a duplicate service name, or registering once
    /// [`Server::serve`] has started, is a configuration error and panics.
    pub fn register_service(&self, desc: ServiceDesc) {
        if self.shared.serving.load(Ordering::SeqCst) {
            panic!("register_service({:?}) after serve", desc.name);
        }
        let service_id = hash(&desc.name);
        let mut services = self
            .shared
            .services
            .write()
            .expect("unable to lock service registry");
        if services.contains_key(&service_id) {
            panic!("duplicate service registration for {:?}", desc.name);
        }

        let mut info = ServiceInfo {
            name: desc.name,
            methods: HashMap::new(),
            streams: HashMap::new(),
        };
        for (name, handler) in desc.methods {
            info.methods.insert(hash(&name), handler);
        }
        for (name, desc, handler) in desc.streams {
            info.streams.insert(hash(&name), StreamMethod { desc, handler });
        }
        info!("registered service {:?}", info.name);
        services.insert(service_id, info);
    }

    /// Accepts and serves connections until [`Server::close`].
    pub async fn serve(&self) -> io::Result<()> {
        self.shared.serving.store(true, Ordering::SeqCst);
        loop {
            let (socket, peer) = tokio::select! {
                _ = self.shared.cancel.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted?,
            };
            info!("accepting connection from {peer}");
            let _ = socket.set_nodelay(true);

            let conn = Arc::new(Conn::new(socket));
            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(err) = conn.clone().recv(shared.as_ref()).await {
                    debug!("client disconnect: {err}");
                }
                conn.close();
                // Unpark any worker still blocked on one of this
                // connection's calls.
                shared.streams.close_for_conn(&conn);
            });
        }
    }

    /// Stops accepting connections and tears down active calls.
    pub fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.streams.reset();
    }
}

impl ServerShared {
    /// Dispatches one `REQUEST` packet.
    ///
    /// Unknown services or methods are logged and the packet dropped;
    /// handler failures answer with `SERVER_ERROR`.
    async fn handle_request(&self, conn: &Arc<Conn>, packet: RpcPacket) {
        let key = StreamKey::from_ids(packet.service_id, packet.method_id);
        let dispatch = {
            let services = self
                .services
                .read()
                .expect("unable to lock service registry");
            let Some(service) = services.get(&packet.service_id) else {
                warn!("service not found: {:#010x}", packet.service_id);
                return;
            };
            if let Some(handler) = service.methods.get(&packet.method_id) {
                Dispatch::Unary(handler.clone())
            } else if let Some(method) = service.streams.get(&packet.method_id) {
                Dispatch::Streaming(method.desc, method.handler.clone())
            } else {
                warn!(
                    "method not found on {:?}: {:#010x}",
                    service.name, packet.method_id
                );
                return;
            }
        };

        match dispatch {
            Dispatch::Unary(handler) => {
                let reply = match (*handler)(packet.payload).await {
                    Ok(payload) => RpcPacket::new(PacketType::Response, key, payload, StatusCode::Ok),
                    Err(status) => {
                        RpcPacket::new(PacketType::ServerError, key, Vec::new(), status)
                    }
                };
                if let Err(err) = conn.send(&reply).await {
                    warn!("failed to send reply for {key:?}: {err}");
                }
            }
            Dispatch::Streaming(desc, handler) => {
                let stream = Stream::new(conn.clone(), key, desc);
                self.streams.add(stream.clone());
                let server_stream = ServerStream {
                    stream: stream.clone(),
                };
                let streams = self.streams.clone();
                tokio::spawn(async move {
                    let status = match (*handler)(server_stream, packet.payload).await {
                        Ok(()) => StatusCode::Ok,
                        Err(status) => status,
                    };
                    // Every server stream ends with a closing RESPONSE
                    // carrying its final status.
                    if let Err(err) = stream.send_empty(status, PacketType::Response).await {
                        debug!("failed to finish call {:?}: {err}", stream.key());
                    }
                    streams.remove(&stream);
                });
            }
        }
    }
}

#[async_trait]
impl PacketHandler for ServerShared {
    async fn handle_packet(&self, conn: &Arc<Conn>, packet: RpcPacket) -> Result<(), RpcError> {
        match packet.packet_type_checked() {
            Some(PacketType::Request) => {
                self.handle_request(conn, packet).await;
                Ok(())
            }
            Some(
                PacketType::ClientStream
                | PacketType::ClientRequestCompletion
                | PacketType::ClientError,
            ) => {
                match self.streams.get(packet.service_id, packet.method_id) {
                    Some(stream) => stream.packet_received(packet).await,
                    None => warn!(
                        "no call for packet: service {:#010x} method {:#010x}; dropping",
                        packet.service_id, packet.method_id
                    ),
                }
                Ok(())
            }
            // The client must never send server-direction packets.
            _ => Err(RpcError::UnexpectedPacketType(packet.packet_type)),
        }
    }
}

/// Server-side handle for one streaming call.
pub struct ServerStream {
    stream: Arc<Stream>,
}

impl ServerStream {
    /// Sends one streamed reply message.
    ///
    /// # Arguments
    ///
    /// * `msg` - Reply message emitted as a `SERVER_STREAM` packet.
    pub async fn send_msg<M: Message>(&self, msg: &M) -> Result<(), RpcError> {
        self.stream
            .send(msg, StatusCode::Ok, PacketType::ServerStream)
            .await
    }

    /// Receives the next request message on a client-streaming call.
    ///
    /// # Returns
    ///
    /// `Ok(Some(msg))` per `CLIENT_STREAM` packet, `Ok(None)` once the
    /// client half-closes with `CLIENT_REQUEST_COMPLETION`, or
    /// [`RpcError::Cancelled`] when the client aborts the call with a
    /// `CLIENT_ERROR` packet.
    pub async fn recv_msg<M: Message + Default>(&self) -> Result<Option<M>, RpcError> {
        let packet = self.stream.recv().await?;
        match packet.packet_type_checked() {
            Some(PacketType::ClientStream) => Ok(Some(M::decode(packet.payload.as_slice())?)),
            Some(PacketType::ClientRequestCompletion) => Ok(None),
            Some(PacketType::ClientError) => Err(RpcError::Cancelled),
            _ => Err(RpcError::UnexpectedPacketType(packet.packet_type)),
        }
    }

    pub fn key(&self) -> StreamKey {
        self.stream.key()
    }
}
