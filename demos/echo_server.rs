//! WebSocket echo server with a keepalive.
//!
//! Run with: cargo run --example echo_server
//! Logging is controlled through `RUST_LOG`, e.g. `RUST_LOG=wsengine=debug`.

use std::error::Error;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wsengine::{CloseCode, Config, Message, Server};

const ADDR: &str = "127.0.0.1:9001";
const PING_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("wsengine=info".parse()?),
        )
        .with_target(false)
        .compact()
        .init();

    let server = Server::bind(ADDR, Config::server()).await?;
    println!("WebSocket Echo Server listening on {}", server.local_addr()?);

    server
        .run(|conn| async move {
            conn.ping(PING_INTERVAL, |conn| async move {
                tracing::info!(peer = %conn.remote_addr(), "peer stopped answering pings");
                if let Err(e) = conn.close_with(CloseCode::GoingAway, "ping timeout").await {
                    tracing::debug!(error = %e, "close after ping timeout failed");
                }
            });

            while let Some(msg) = conn.recv().await {
                match &msg {
                    Message::Text(text) => tracing::info!(len = text.len(), "text received"),
                    Message::Binary(data) => tracing::info!(len = data.len(), "binary received"),
                }
                if let Err(e) = conn.send(msg).await {
                    tracing::warn!(error = %e, "echo failed");
                    break;
                }
            }
            tracing::info!("session ended");
        })
        .await;

    Ok(())
}
