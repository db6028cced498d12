//! Connection lifecycle (RFC 6455 §4, §7).

use std::sync::atomic::{AtomicU8, Ordering};

/// WebSocket connection state.
///
/// Moves forward only: `Handshaking → Open → Closing → Closed`. A connection may skip
/// `Closing` when the stream dies without a close handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// The HTTP upgrade has not completed yet.
    #[default]
    Handshaking,
    /// Handshake done; messages flow both ways.
    Open,
    /// A Close frame has been sent or received.
    Closing,
    /// Reader stopped, write side shut down.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for every state but `Closed`.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Data frames may only be sent while `Open`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    const fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Handshaking => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Handshaking,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// A [`ConnectionState`] shared between the reader task and every connection handle.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` if the state was no longer `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Jump to `Closed` from wherever the connection is.
    pub(crate) fn close(&self) {
        self.0.store(ConnectionState::Closed.as_u8(), Ordering::Release);
    }
}
