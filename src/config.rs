//! Configuration and limits for server connections.

use std::time::Duration;

use crate::error::{Error, Result};

/// Resource limits applied to every connection.
///
/// These bound the memory a single peer can make the server allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of frames a fragmented message may span.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of the HTTP upgrade request header block.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Small limits for memory-constrained deployments.
    ///
    /// 64 KB frames, 256 KB messages, 16 fragments, 4 KB handshake.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
            max_handshake_size: 4096,
        }
    }

    /// Check a declared frame payload length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds `max_frame_size`.
    pub const fn check_frame_size(&self, size: u64) -> Result<()> {
        if size > self.max_frame_size as u64 {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Check the running size of a message being reassembled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds `max_message_size`.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Check the number of frames in a fragmented message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds `max_fragment_count`.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Check the size of the buffered handshake request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds `max_handshake_size`.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Per-connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Capacity of the inbound message queue.
    ///
    /// When the queue is full the read loop stops reading from the socket until the
    /// application catches up.
    ///
    /// Default: 1024
    pub inbound_capacity: usize,

    /// Read buffer size (in bytes).
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Write buffer size (in bytes).
    ///
    /// Default: 8 KB
    pub write_buffer_size: usize,

    /// Upper bound on the whole upgrade exchange. `None` waits forever.
    ///
    /// Default: 30 seconds
    pub handshake_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            inbound_capacity: 1024,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            handshake_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Server configuration. Currently identical to [`Config::default`].
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the inbound queue capacity. Values below one are raised to one.
    #[must_use]
    pub const fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set or clear the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
