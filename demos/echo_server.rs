//! Demo echo server: serves a Benchmark-style echo service over pw_rpc.
//!
//! Run with an optional listen endpoint argument, then point
//! `echo_client` at it:
//!
//! ```text
//! cargo run --example echo_server -- 127.0.0.1:8111
//! ```

use pw_rpc::{MethodDescriptor, Server, ServiceDesc, StatusCode};

/// Mirror of the `pw.rpc.Benchmark` payload message.
#[derive(Clone, PartialEq, ::prost::Message)]
struct Payload {
    #[prost(bytes = "vec", tag = "1")]
    payload: Vec<u8>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8111".to_string());

    let server = Server::bind(&endpoint).await?;
    server.register_service(
        ServiceDesc::new("pw.rpc.Benchmark")
            .unary_fn("UnaryEcho", |request: Payload| async move {
                Ok::<_, StatusCode>(request)
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
                            stream.send_msg(&msg).await.map_err(|_| StatusCode::Aborted)?;
                        }
                        Ok(())
                    })
                },
            ),
    );

    println!("Echo server listening on {}", server.local_addr()?);
    server.serve().await?;
    Ok(())
}
