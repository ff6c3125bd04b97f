//! Demo echo client: exercises the unary and bidirectional echo methods
//! served by `echo_server`.
//!
//! ```text
//! cargo run --example echo_client -- 127.0.0.1:8111
//! ```

use std::time::Duration;

use pw_rpc::{Client, MethodDescriptor};

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
    let client = Client::new(endpoint);

    for i in 0..5 {
        let request = Payload {
            payload: format!("Hello #{i}").into_bytes(),
        };
        println!("Sending UnaryEcho = {}", String::from_utf8_lossy(&request.payload));
        let reply: Payload = client
            .invoke("/pw.rpc.Benchmark/UnaryEcho", &request)
            .await?;
        println!("Received UnaryEcho = {}", String::from_utf8_lossy(&reply.payload));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let mut call = client
        .call(
            "/pw.rpc.Benchmark/BidirectionalEcho",
            MethodDescriptor::BIDIRECTIONAL,
        )
        .await?;
    for i in 0..5 {
        let request = Payload {
            payload: format!("Message {i}").into_bytes(),
        };
        println!("Sending BiDirectional = {}", String::from_utf8_lossy(&request.payload));
        call.send_msg(&request).await?;
        if let Some(reply) = call.recv_msg::<Payload>().await? {
            println!("Received BiDirectional = {}", String::from_utf8_lossy(&reply.payload));
        }
    }
    call.close_send().await?;
    // Drain until the server finishes the call.
    while call.recv_msg::<Payload>().await?.is_some() {}

    client.close().await;
    Ok(())
}
