use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use futures_core::Stream;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Config;
use crate::connection::keepalive::KeepAlive;
use crate::connection::reader;
use crate::connection::state::{AtomicState, ConnectionState};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::Frame;

struct Shared<T> {
    state: AtomicState,
    remote_addr: SocketAddr,
    /// Every outgoing frame goes through this lock, so frames from the application,
    /// the reader (pongs, close echoes) and the keepalive never interleave.
    writer: Mutex<FrameWriter<WriteHalf<T>>>,
    inbound: Mutex<mpsc::Receiver<Message>>,
    keepalive: std::sync::Mutex<Option<KeepAlive>>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A server-side WebSocket connection.
///
/// Created by [`accept`](crate::accept) once the upgrade handshake has completed. A
/// background task reads frames from the peer, answers pings, and queues complete
/// messages for [`recv`](Self::recv).
///
/// `Connection` is a cheap handle: clones share the same socket, queue and state, so one
/// task can receive while others send.
///
/// ## Example
///
/// ```rust,ignore
/// use wsengine::{Config, Message, accept};
///
/// let conn = accept(stream, peer_addr, &Config::server()).await?;
/// while let Some(msg) = conn.recv().await {
///     conn.send(msg).await?;
/// }
/// ```
pub struct Connection<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.shared.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T> Connection<T> {
    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Returns `true` while data can still be sent.
    pub fn is_open(&self) -> bool {
        self.state().can_send()
    }

    /// Address of the peer as reported by the accept loop.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Stop the active keepalive, if any. Safe to call repeatedly and from inside a
    /// keepalive timeout callback.
    pub fn cancel_ping(&self) {
        let keepalive = self
            .shared
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(keepalive) = keepalive {
            keepalive.cancel();
        }
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the connection has ended and every queued message has been
    /// delivered. An empty message is still `Some`.
    pub async fn recv(&self) -> Option<Message> {
        self.shared.inbound.lock().await.recv().await
    }

    /// The inbound messages as a [`Stream`]. Ends when [`recv`](Self::recv) would
    /// return `None`.
    pub fn messages(&self) -> Messages<T> {
        Messages {
            conn: self.clone(),
            pending: None,
        }
    }

    fn begin_closing(&self) -> bool {
        self.shared
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
    }

    pub(crate) fn notify_pong(&self) {
        if let Some(keepalive) = self
            .shared
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            keepalive.notify_pong();
        }
    }

    fn abort_reader(&self) {
        let task = self
            .shared
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Take over a stream whose handshake has completed and start its reader task.
    ///
    /// `leftover` holds bytes that arrived together with the handshake request.
    pub(crate) fn open(io: T, leftover: BytesMut, remote_addr: SocketAddr, config: &Config) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        let conn = Self {
            shared: Arc::new(Shared {
                state: AtomicState::new(ConnectionState::Open),
                remote_addr,
                writer: Mutex::new(FrameWriter::new(write_half, config)),
                inbound: Mutex::new(inbound_rx),
                keepalive: std::sync::Mutex::new(None),
                reader_task: std::sync::Mutex::new(None),
            }),
        };

        let frames = FrameReader::with_buffer(read_half, leftover, config);
        let task = tokio::spawn(reader::run(
            conn.clone(),
            frames,
            inbound_tx,
            config.limits,
        ));
        *conn
            .shared
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        conn
    }

    /// Send a message as a single frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the connection is no longer open
    /// - `Error::Io` if the write fails
    pub async fn send(&self, message: Message) -> Result<()> {
        let frame = match message {
            Message::Text(text) => Frame::text(text.into_bytes()),
            Message::Binary(data) => Frame::binary(data),
        };
        self.write_if_open(&frame).await
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.write_if_open(&Frame::text(text.as_bytes())).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.write_if_open(&Frame::binary(data)).await
    }

    /// Send `data` as one text frame and return the number of payload bytes written.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidUtf8` if `data` is not UTF-8; nothing is sent
    /// - otherwise as [`send`](Self::send)
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if std::str::from_utf8(data).is_err() {
            return Err(Error::InvalidUtf8);
        }
        self.write_if_open(&Frame::text(data)).await?;
        Ok(data.len())
    }

    /// Start a keepalive, replacing any keepalive already running.
    ///
    /// Every `interval` an empty Ping is sent. If no Pong arrives within another
    /// `interval`, `on_timeout` is called once with a handle to this connection and the
    /// keepalive stops. The connection itself stays open; closing it is up to
    /// `on_timeout`.
    pub fn ping<F, Fut>(&self, interval: Duration, on_timeout: F)
    where
        F: FnOnce(Connection<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let keepalive = KeepAlive::start(self.clone(), interval, on_timeout);
        let previous = self
            .shared
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(keepalive);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Close the connection with status 1000.
    ///
    /// # Errors
    ///
    /// See [`close_with`](Self::close_with).
    pub async fn close(&self) -> Result<()> {
        self.close_with(CloseCode::Normal, "").await
    }

    /// Close the connection: send a Close frame, shut the write side down and stop the
    /// reader. Messages already queued can still be received; after them `recv` returns
    /// `None`.
    ///
    /// Calling this on a connection that is already closing or closed does nothing.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` if `code` may not be sent on the wire (outside
    ///   1000-1003, 1007-1014 and 3000-4999); the connection is left untouched
    /// - `Error::Io` if the Close frame could not be written; teardown still happens
    pub async fn close_with(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !code.is_sendable() {
            return Err(Error::ProtocolViolation(format!(
                "Close code {code} may not be sent"
            )));
        }

        self.cancel_ping();

        // A peer Close echoed by the reader and this one are decided under the same
        // lock, so exactly one Close frame goes out and it precedes the shutdown.
        let mut writer = self.shared.writer.lock().await;
        let mut result = Ok(());
        if self.begin_closing() {
            tracing::debug!(%code, "closing connection");
            let frame = Frame::close(CloseFrame::new(code, reason).to_payload());
            result = writer.write_frame(&frame).await;
        }
        if let Err(e) = writer.shutdown().await {
            tracing::trace!(error = %e, "shutdown after close failed");
        }

        // the reader cannot be inside a write while we hold the lock
        self.abort_reader();
        drop(writer);

        self.shared.state.close();
        result
    }

    /// Send a Close frame carrying `payload` if the connection is still open, moving it
    /// to `Closing`. Returns `None` when another Close already went out.
    pub(crate) async fn send_close(&self, payload: Vec<u8>) -> Option<Result<()>> {
        let mut writer = self.shared.writer.lock().await;
        if !self.begin_closing() {
            return None;
        }
        Some(writer.write_frame(&Frame::close(payload)).await)
    }

    /// Write a frame only while the connection is open. The state is checked under the
    /// writer lock, so nothing follows a Close frame.
    pub(crate) async fn write_if_open(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.shared.writer.lock().await;
        if !self.state().can_send() {
            return Err(Error::ConnectionClosed);
        }
        writer.write_frame(frame).await
    }

    /// Final teardown once the reader has stopped.
    pub(crate) async fn finish(&self) {
        self.shared.state.close();
        self.cancel_ping();
        if let Err(e) = self.shared.writer.lock().await.shutdown().await {
            tracing::trace!(error = %e, "shutdown failed");
        }
    }
}

type RecvFuture = Pin<Box<dyn Future<Output = Option<Message>> + Send>>;

/// Stream of inbound messages returned by [`Connection::messages`].
pub struct Messages<T> {
    conn: Connection<T>,
    pending: Option<RecvFuture>,
}

impl<T: Send + 'static> Stream for Messages<T> {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        let this = self.get_mut();
        let pending = this.pending.get_or_insert_with(|| {
            let conn = this.conn.clone();
            Box::pin(async move { conn.recv().await })
        });

        let item = std::task::ready!(pending.as_mut().poll(cx));
        this.pending = None;
        Poll::Ready(item)
    }
}
