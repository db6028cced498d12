//! Server side of the HTTP Upgrade handshake (RFC 6455 §4.2).
//!
//! Only the request line and the `Sec-WebSocket-Key` header matter here. The rest of
//! the header block is read, parsed into a throwaway map and dropped.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key";

/// Computes the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Collect `name: value` lines into a map keyed by lowercase name.
///
/// Stops at the first empty line. Lines without a colon are ignored. A repeated
/// `Sec-WebSocket-Key` is rejected since the accept key would be ambiguous.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name == KEY_HEADER && headers.contains_key(KEY_HEADER) {
            return Err(Error::InvalidHandshake(
                "Duplicate Sec-WebSocket-Key header".into(),
            ));
        }
        headers.insert(name, value.trim().to_string());
    }

    Ok(headers)
}

/// The parts of an upgrade request the engine keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/chat`.
    pub path: String,
    /// Value of `Sec-WebSocket-Key`.
    pub key: String,
}

impl HandshakeRequest {
    /// Parse a complete request head (request line and headers).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - the data is not UTF-8 or is empty
    /// - the request line is not `GET <path> HTTP/<version>`
    /// - `Sec-WebSocket-Key` is missing, empty or repeated
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidHandshake(format!(
                "Malformed request line: {request_line}"
            )));
        };

        if method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {method}"
            )));
        }
        if !version.starts_with("HTTP/") {
            return Err(Error::InvalidHandshake(format!(
                "Expected an HTTP version, got {version}"
            )));
        }

        let headers = parse_headers(lines)?;
        let key = headers
            .get(KEY_HEADER)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?
            .clone();

        Ok(Self {
            path: path.to_string(),
            key,
        })
    }
}

/// The `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The `Sec-WebSocket-Accept` value.
    pub accept: String,
}

impl HandshakeResponse {
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    /// Append the response head to `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(b"Sec-WebSocket-Accept: ");
        buf.extend_from_slice(self.accept.as_bytes());
        buf.extend_from_slice(b"\r\n\r\n");
    }
}

/// Offset just past the blank line ending the header block, if it has arrived.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some(i + 4)
        } else if rest.starts_with(b"\n\n") {
            Some(i + 2)
        } else {
            None
        }
    })
}

/// Run the server handshake on a freshly accepted stream.
///
/// Reads the request head, answers with `101 Switching Protocols` and returns the
/// parsed request together with any bytes the client sent after the head. Those bytes
/// belong to the first frames and must be fed to the frame reader.
///
/// # Errors
///
/// - [`Error::HandshakeTooLarge`] if no blank line shows up within
///   `limits.max_handshake_size` bytes
/// - [`Error::InvalidHandshake`] for a malformed request or a stream that ends early
/// - [`Error::Io`] if reading the request or writing the response fails
pub async fn negotiate<S>(io: &mut S, limits: &Limits) -> Result<(HandshakeRequest, BytesMut)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let mut scanned: usize = 0;

    let head_end = loop {
        // a terminator may straddle two reads, so back up three bytes
        if let Some(end) = find_head_end(&buf[scanned.saturating_sub(3)..]) {
            break scanned.saturating_sub(3) + end;
        }
        scanned = buf.len();
        limits.check_handshake_size(buf.len())?;

        if io.read_buf(&mut buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "Connection closed before the request head was complete".into(),
            ));
        }
    };
    limits.check_handshake_size(head_end)?;

    let head = buf.split_to(head_end);
    let request = HandshakeRequest::parse(&head)?;

    let mut response = Vec::with_capacity(128);
    HandshakeResponse::from_request(&request).write(&mut response);
    io.write_all(&response).await?;
    io.flush().await?;

    Ok((request, buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Origin: http://example.com\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_valid_request() {
        let req = HandshakeRequest::parse(RFC_REQUEST).unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_parse_only_key_is_required() {
        let req = HandshakeRequest::parse(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n\r\n").unwrap();
        assert_eq!(req.key, "abc");
    }

    #[test]
    fn test_parse_header_names_case_insensitive() {
        let req = HandshakeRequest::parse(b"GET / HTTP/1.1\r\nsec-websocket-KEY:   k3y  \r\n\r\n")
            .unwrap();
        assert_eq!(req.key, "k3y");
    }

    #[test]
    fn test_parse_missing_key() {
        let err = HandshakeRequest::parse(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Sec-WebSocket-Key")));
    }

    #[test]
    fn test_parse_empty_key() {
        let err = HandshakeRequest::parse(b"GET / HTTP/1.1\r\nSec-WebSocket-Key:   \r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(_)));
    }

    #[test]
    fn test_parse_duplicate_key() {
        let err = HandshakeRequest::parse(
            b"GET / HTTP/1.1\r\nSec-WebSocket-Key: a\r\nSec-WebSocket-Key: b\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_parse_malformed_request_line() {
        for bad in [
            &b"\r\n\r\n"[..],
            b"GET /\r\nSec-WebSocket-Key: a\r\n\r\n",
            b"GET / HTTP/1.1 extra\r\nSec-WebSocket-Key: a\r\n\r\n",
            b"POST / HTTP/1.1\r\nSec-WebSocket-Key: a\r\n\r\n",
            b"GET / SPDY/3\r\nSec-WebSocket-Key: a\r\n\r\n",
            b"\xff\xfe / HTTP/1.1\r\n\r\n",
        ] {
            assert!(
                matches!(HandshakeRequest::parse(bad), Err(Error::InvalidHandshake(_))),
                "accepted {:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn test_response_bytes() {
        let req = HandshakeRequest::parse(RFC_REQUEST).unwrap();
        let mut buf = Vec::new();
        HandshakeResponse::from_request(&req).write(&mut buf);
        assert_eq!(
            buf,
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
              \r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\n\nrest"), Some(16));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_negotiate_keeps_trailing_bytes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut request = RFC_REQUEST.to_vec();
        request.extend_from_slice(&[0x81, 0x80]);
        client.write_all(&request).await.unwrap();

        let (req, rest) = negotiate(&mut server, &Limits::default()).await.unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(&rest[..], &[0x81, 0x80]);

        let mut response = vec![0u8; 129];
        client.read_exact(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_negotiate_request_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move {
            negotiate(&mut server, &Limits::default()).await
        });

        for chunk in RFC_REQUEST.chunks(7) {
            client.write_all(chunk).await.unwrap();
            tokio::task::yield_now().await;
        }

        let (req, rest) = task.await.unwrap().unwrap();
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_eof_before_head() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: a\r\n").await.unwrap();
        drop(client);

        let err = negotiate(&mut server, &Limits::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(_)));
    }

    #[tokio::test]
    async fn test_negotiate_head_too_large() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let mut request = b"GET / HTTP/1.1\r\n".to_vec();
        request.extend(std::iter::repeat_n(b'x', 9000));
        client.write_all(&request).await.unwrap();

        let err = negotiate(&mut server, &Limits::default()).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTooLarge { max: 8192, .. }));
    }
}
