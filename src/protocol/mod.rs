//! Wire-level protocol pieces (RFC 6455): opcodes, masking, frames, the upgrade
//! handshake and message reassembly. Nothing in here touches a socket except
//! [`handshake::negotiate`].

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use assembler::MessageAssembler;
pub use frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key, negotiate};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
