//! Accepting connections: the handshake entry point and a small TCP accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::Instrument;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::negotiate;

/// Run the upgrade handshake on `stream` and start the connection's reader task.
///
/// On failure the stream is dropped and no reader is started.
///
/// # Errors
///
/// - `Error::InvalidHandshake` for a malformed request, an early EOF, or when
///   `config.handshake_timeout` expires
/// - `Error::HandshakeTooLarge` if the request head exceeds the configured limit
/// - `Error::Io` if reading the request or writing the response fails
pub async fn accept<S>(mut stream: S, remote_addr: SocketAddr, config: &Config) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handshake = negotiate(&mut stream, &config.limits);
    let (request, leftover) = match config.handshake_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| Error::InvalidHandshake("Handshake timed out".into()))??,
        None => handshake.await?,
    };

    tracing::info!(path = %request.path, "handshake complete");
    Ok(Connection::open(stream, leftover, remote_addr, config))
}

/// A TCP listener that upgrades every accepted connection and hands it to a handler.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: Config,
}

impl Server {
    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs, config: Config) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(Self { listener, config })
    }

    /// The address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    ///
    /// Each connection gets its own task: handshake, then `handler`. Handshake failures
    /// are logged and never reach the handler. When the handler's future completes the
    /// connection is closed.
    pub async fn run<F, Fut>(self, handler: F)
    where
        F: Fn(Connection<TcpStream>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let config = Arc::new(self.config);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "set_nodelay failed");
            }
            tracing::info!(%peer, "connection accepted");

            let handler = Arc::clone(&handler);
            let config = Arc::clone(&config);
            let span = tracing::info_span!("connection", %peer);
            tokio::spawn(
                async move {
                    let conn = match accept(stream, peer, &config).await {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "handshake failed");
                            return;
                        }
                    };
                    handler(conn.clone()).await;
                    if let Err(e) = conn.close().await {
                        tracing::debug!(error = %e, "close after handler failed");
                    }
                }
                .instrument(span),
            );
        }
    }
}
