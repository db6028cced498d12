//! Application messages and close status codes (RFC 6455 §5.6, §7.4).

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    #[default]
    Normal,
    /// 1001: endpoint going away (server shutdown, page navigation).
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: received a data type the endpoint cannot accept.
    UnsupportedData,
    /// 1005: no status code was present. Never sent on the wire.
    NoStatus,
    /// 1007: payload inconsistent with the message type (e.g. non-UTF-8 text).
    InvalidPayload,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big to process.
    MessageTooBig,
    /// 1011: unexpected server condition.
    InternalError,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether this code may appear in a Close frame: the defined codes 1000-1003 and
    /// 1007-1014, or an application code in 3000-4999. Everything else, including
    /// 1004-1006 and 1015, is never sent.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Status code and reason carried by a Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason (UTF-8, at most 123 bytes on the wire).
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame body.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Decode a Close frame payload.
    ///
    /// An empty payload yields `None`. A one-byte payload or a reason that is not UTF-8
    /// yields a frame describing the violation, so the caller can still echo something
    /// meaningful.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            [] => None,
            [_] => Some(Self::new(CloseCode::ProtocolError, "invalid close frame")),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
                match std::str::from_utf8(reason) {
                    Ok(reason) => Some(Self::new(code, reason)),
                    Err(_) => Some(Self::new(CloseCode::InvalidPayload, "")),
                }
            }
        }
    }

    /// Encode as a Close frame payload. The reason is cut at a character boundary so the
    /// payload stays within the 125-byte control frame limit.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut end = self.reason.len().min(123);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = Vec::with_capacity(2 + end);
        payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
        payload.extend_from_slice(&self.reason.as_bytes()[..end]);
        payload
    }
}

/// A complete application message, possibly reassembled from several frames.
///
/// A zero-length message is a legal message; the end of a stream is reported
/// separately by [`Connection::recv`](crate::Connection::recv) returning `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8).
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// The message bytes, whatever the tag.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Consume the message and return its bytes.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(s) => s.into_bytes(),
            Message::Binary(data) => data,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }

    /// Consume and return the text content, if this is a text message.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data)
    }
}
