//! Client-side helpers shared by the integration tests.
//!
//! The library only speaks the server role, so masked client frames are built by hand.

#![allow(dead_code)]

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use wsengine::protocol::{OpCode, apply_mask};
use wsengine::{Config, Connection, accept};

pub const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

pub fn upgrade_request(key: &str) -> String {
    format!(
        "GET /chat HTTP/1.1\r\n\
         Host: server.example.com\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Encode a client frame with an explicit FIN bit, masked with `mask`.
pub fn client_frame_with(fin: bool, opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    let fin_bit = if fin { 0x80 } else { 0x00 };
    out.push(fin_bit | u8::from(opcode));

    let len = payload.len();
    if len <= 125 {
        out.push(0x80 | len as u8);
    } else if len <= 0xFFFF {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(&mask);
    let mut body = payload.to_vec();
    apply_mask(&mut body, mask);
    out.extend_from_slice(&body);
    out
}

/// A final client frame with a fixed mask.
pub fn client_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    client_frame_with(true, opcode, payload, [0x37, 0xfa, 0x21, 0x3d])
}

/// A frame as the server sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Read one server frame, checking that it is unmasked.
pub async fn read_server_frame<R: AsyncRead + Unpin>(io: &mut R) -> ServerFrame {
    let mut head = [0u8; 2];
    io.read_exact(&mut head).await.expect("frame header");
    assert_eq!(head[1] & 0x80, 0, "server frames must not be masked");

    let len = match head[1] & 0x7f {
        126 => {
            let mut ext = [0u8; 2];
            io.read_exact(&mut ext).await.expect("16-bit length");
            usize::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0u8; 8];
            io.read_exact(&mut ext).await.expect("64-bit length");
            u64::from_be_bytes(ext) as usize
        }
        n => usize::from(n),
    };

    let mut payload = vec![0u8; len];
    io.read_exact(&mut payload).await.expect("payload");
    ServerFrame {
        fin: head[0] & 0x80 != 0,
        opcode: head[0] & 0x0f,
        payload,
    }
}

/// Read the 101 response head.
pub async fn read_response<R: AsyncRead + Unpin>(io: &mut R) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        io.read_exact(&mut byte).await.expect("response byte");
        head.push(byte[0]);
    }
    String::from_utf8(head).expect("ascii response")
}

/// Perform the handshake on the client side of `io`.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(io: &mut S) -> String {
    io.write_all(upgrade_request(RFC_KEY).as_bytes())
        .await
        .expect("send request");
    read_response(io).await
}

pub fn peer_addr() -> SocketAddr {
    "192.0.2.7:50000".parse().unwrap()
}

/// An upgraded in-memory connection and the client end of its pipe.
pub async fn connect(config: Config) -> (Connection<DuplexStream>, DuplexStream) {
    let (mut client, server) = tokio::io::duplex(256 * 1024);
    let accepting = tokio::spawn(async move { accept(server, peer_addr(), &config).await });

    let response = client_handshake(&mut client).await;
    assert!(response.contains(RFC_ACCEPT), "unexpected response: {response}");

    let conn = accepting.await.expect("accept task").expect("handshake");
    (conn, client)
}
