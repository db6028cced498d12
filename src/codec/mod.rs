//! Frame-level reading and writing over async byte streams.

mod framed;

pub use framed::{FrameReader, FrameWriter};
