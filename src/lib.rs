//! # wsengine - server-side WebSocket engine
//!
//! `wsengine` speaks the server half of RFC 6455 over any ordered, reliable byte
//! stream: plain TCP, TLS wrapped by the caller, or an in-memory pipe.
//!
//! ## Features
//!
//! - **HTTP upgrade handshake** with `Sec-WebSocket-Accept` derivation
//! - **Frame codec** covering every length form, client masking and control frame rules
//! - **Background reader** that answers pings, reassembles fragments and applies
//!   backpressure through a bounded queue
//! - **Keepalive** pings with a timeout callback and cancellation
//! - **Serialized writes**: application sends, pongs, pings and close frames share one
//!   write lock
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsengine::{Config, Server};
//!
//! let server = Server::bind("127.0.0.1:9001", Config::server()).await?;
//! server
//!     .run(|conn| async move {
//!         while let Some(msg) = conn.recv().await {
//!             if conn.send(msg).await.is_err() {
//!                 break;
//!             }
//!         }
//!     })
//!     .await;
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;

pub use config::{Config, Limits};
pub use connection::{Connection, ConnectionState, Messages};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
pub use server::{Server, accept};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Config>();
        assert_send::<Limits>();
        assert_send::<Message>();
        assert_send::<CloseCode>();
        assert_send::<CloseFrame>();
        assert_send::<ConnectionState>();
        assert_send::<Connection<tokio::net::TcpStream>>();
        assert_send::<Messages<tokio::net::TcpStream>>();
        assert_send::<Server>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Config>();
        assert_sync::<Limits>();
        assert_sync::<Message>();
        assert_sync::<CloseCode>();
        assert_sync::<CloseFrame>();
        assert_sync::<ConnectionState>();
        assert_sync::<Connection<tokio::net::TcpStream>>();
    }
}
