//! Connection handling once the handshake is done.
//!
//! ## Connection Lifecycle
//!
//! 1. **Handshaking** - upgrade request being read (never observable on a `Connection`)
//! 2. **Open** - reader task running, messages flow both ways
//! 3. **Closing** - a Close frame was sent or received
//! 4. **Closed** - reader stopped, write side shut down, `recv` drains then yields `None`

#[allow(clippy::module_inception)]
mod connection;
mod keepalive;
mod reader;
mod state;

pub use connection::{Connection, Messages};
pub use state::ConnectionState;
