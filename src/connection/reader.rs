//! The per-connection read loop.
//!
//! Runs as its own task from the end of the handshake until the stream ends, the peer
//! closes, a protocol error occurs, or the connection is closed locally.

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;

use crate::codec::FrameReader;
use crate::config::Limits;
use crate::connection::Connection;
use crate::error::Error;
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, MessageAssembler, OpCode};

pub(crate) async fn run<T>(
    conn: Connection<T>,
    mut frames: FrameReader<ReadHalf<T>>,
    inbound: mpsc::Sender<Message>,
    limits: Limits,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut assembler = MessageAssembler::new(limits);

    loop {
        let frame = match frames.read_frame().await {
            Ok(frame) => frame,
            Err(Error::ConnectionClosed) => {
                tracing::debug!("stream ended");
                break;
            }
            Err(e) if e.is_protocol_error() => {
                fail(&conn, &e).await;
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "read failed");
                break;
            }
        };

        tracing::trace!(
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "frame received"
        );

        match frame.opcode {
            OpCode::Pong => conn.notify_pong(),
            OpCode::Ping => {
                let pong = Frame::pong(frame.into_payload());
                if let Err(e) = conn.write_if_open(&pong).await {
                    tracing::debug!(error = %e, "pong not sent");
                }
            }
            OpCode::Close => {
                echo_close(&conn, frame.payload()).await;
                break;
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => match assembler.push(frame) {
                Ok(Some(message)) => {
                    // blocks while the queue is full
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    fail(&conn, &e).await;
                    break;
                }
            },
        }
    }

    conn.finish().await;
    tracing::debug!("reader stopped");
    // dropping `inbound` here is the end-of-stream marker
}

/// Answer a peer's Close. Only the first Close on an open connection gets a reply.
async fn echo_close<T>(conn: &Connection<T>, payload: &[u8])
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let received = CloseFrame::parse(payload);
    tracing::debug!(
        code = received.as_ref().map(|f| f.code.as_u16()),
        reason = received.as_ref().map(|f| f.reason.as_str()),
        "close received"
    );

    let reply = match received {
        Some(frame) if frame.code.is_sendable() => CloseFrame::new(frame.code, "").to_payload(),
        Some(_) => CloseFrame::new(CloseCode::ProtocolError, "").to_payload(),
        None => Vec::new(),
    };
    if let Some(Err(e)) = conn.send_close(reply).await {
        tracing::debug!(error = %e, "close reply not sent");
    }
}

/// Tell the peer why the connection is going away. Best effort.
async fn fail<T>(conn: &Connection<T>, error: &Error)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    tracing::warn!(error = %error, peer = %conn.remote_addr(), "protocol violation");

    let code = error.close_code().unwrap_or(CloseCode::ProtocolError);
    if let Some(Err(e)) = conn.send_close(CloseFrame::new(code, "").to_payload()).await {
        tracing::debug!(error = %e, "close frame not sent");
    }
}
