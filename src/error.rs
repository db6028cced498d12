//! Error types for the WebSocket engine.
//!
//! Errors fall into three groups: handshake failures (the connection is dropped before
//! any application code sees it), protocol violations (the connection is closed with a
//! matching close code) and stream failures (treated like a close from the peer on the
//! read side, returned to the caller on the write side).

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a WebSocket connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The HTTP upgrade request was malformed or incomplete.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The HTTP upgrade request exceeded the configured header limit.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Generic protocol violation (unexpected continuation, interrupted fragment, ...).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode (0x3-0x7, 0xB-0xF) received.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Opcode value does not fit in four bits.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Client frame arrived without a mask.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Control frame with FIN cleared.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload above 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// 64-bit payload length with the most significant bit set.
    #[error("Payload length out of range: {0}")]
    PayloadLengthOverflow(u64),

    /// Frame payload exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size reached so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Fragmented message split into too many frames.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragment count reached.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Text message is not valid UTF-8.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Not enough buffered bytes to decode a frame.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// The stream ended or the connection is no longer open.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether this error is a violation of the wire protocol by the peer.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_)
                | Error::ReservedOpcode(_)
                | Error::InvalidOpcode(_)
                | Error::UnmaskedClientFrame
                | Error::FragmentedControlFrame
                | Error::ControlFrameTooLarge(_)
                | Error::PayloadLengthOverflow(_)
                | Error::FrameTooLarge { .. }
                | Error::MessageTooLarge { .. }
                | Error::TooManyFragments { .. }
                | Error::InvalidUtf8
        )
    }

    /// Close code to send to the peer when this error tears a connection down.
    ///
    /// Returns `None` for errors that leave no usable stream to send on.
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. } => Some(CloseCode::MessageTooBig),
            e if e.is_protocol_error() => Some(CloseCode::ProtocolError),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
