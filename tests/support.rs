//! Shared fixtures for the RPC integration tests: the demo payload message
//! and an echo service in the style of `pw.rpc.Benchmark`.

use pw_rpc::{MethodDescriptor, ServiceDesc, StatusCode};
use tokio::sync::mpsc;

/// Payload message used by the echo methods.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: bytes.into(),
        }
    }
}

/// Builds the test service.
///
/// The client-streaming `Collect` method forwards everything it gathered
/// through `collected`, so tests can observe what arrived server-side.
pub fn benchmark_service(collected: mpsc::UnboundedSender<Vec<u8>>) -> ServiceDesc {
    ServiceDesc::new("pw.rpc.Benchmark")
        .unary_fn("UnaryEcho", |request: Payload| async move {
            Ok::<_, StatusCode>(request)
        })
        .unary_fn("FailingEcho", |_request: Payload| async move {
            Err::<Payload, _>(StatusCode::InvalidArgument)
        })
        .streaming(
            "BidirectionalEcho",
            MethodDescriptor::BIDIRECTIONAL,
            |stream, _request| {
                Box::pin(async move {
                    while let Some(msg) = stream
                        .recv_msg::<Payload>()
                        .await
                        .map_err(|_| StatusCode::Aborted)?
                    {
                        stream
                            .send_msg(&msg)
                            .await
                            .map_err(|_| StatusCode::Aborted)?;
                    }
                    Ok(())
                })
            },
        )
        .streaming(
            "Collect",
            MethodDescriptor::CLIENT_STREAMING,
            move |stream, _request| {
                let collected = collected.clone();
                Box::pin(async move {
                    let mut gathered = Vec::new();
                    while let Some(msg) = stream
                        .recv_msg::<Payload>()
                        .await
                        .map_err(|_| StatusCode::Aborted)?
                    {
                        gathered.extend_from_slice(&msg.payload);
                    }
                    let _ = collected.send(gathered);
                    Ok(())
                })
            },
        )
}
