//! Ping/pong keepalive.
//!
//! One task per active keepalive. The cycle is: sleep `interval`, send an empty Ping,
//! then wait up to `interval` for a Pong. A Pong restarts the cycle; silence calls the
//! timeout callback and ends it.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::connection::Connection;
use crate::protocol::Frame;

/// Control side of a running keepalive task.
#[derive(Debug)]
pub(crate) struct KeepAlive {
    cancel: watch::Sender<bool>,
    pongs: mpsc::Sender<()>,
}

impl KeepAlive {
    pub(crate) fn start<T, F, Fut>(conn: Connection<T>, interval: Duration, on_timeout: F) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce(Connection<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = watch::channel(false);
        // one slot: a pong is either pending or not
        let (pongs, pong_rx) = mpsc::channel(1);

        tracing::debug!(?interval, "keepalive started");
        tokio::spawn(run(conn, interval, cancelled, pong_rx, on_timeout));

        Self { cancel, pongs }
    }

    /// Record a Pong. Never blocks; extra pongs are dropped.
    pub(crate) fn notify_pong(&self) {
        let _ = self.pongs.try_send(());
    }

    /// Stop the task at its next wait point.
    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

async fn run<T, F, Fut>(
    conn: Connection<T>,
    interval: Duration,
    mut cancelled: watch::Receiver<bool>,
    mut pongs: mpsc::Receiver<()>,
    on_timeout: F,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce(Connection<T>) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }

        // pongs that arrived while idle do not answer the ping about to be sent
        while pongs.try_recv().is_ok() {}

        if *cancelled.borrow() {
            break;
        }
        if let Err(e) = conn.write_if_open(&Frame::ping(Vec::new())).await {
            tracing::debug!(error = %e, "keepalive ping not sent, stopping");
            break;
        }
        tracing::trace!("keepalive ping sent");

        tokio::select! {
            _ = cancelled.changed() => break,
            pong = pongs.recv() => {
                if pong.is_none() {
                    break;
                }
                tracing::trace!("keepalive pong received");
            }
            () = tokio::time::sleep(interval) => {
                tracing::debug!(peer = %conn.remote_addr(), "keepalive timed out");
                on_timeout(conn).await;
                return;
            }
        }
    }
    tracing::debug!("keepalive stopped");
}
