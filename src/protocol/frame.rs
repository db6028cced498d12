//! Frame decoding and encoding (RFC 6455 §5.2).
//!
//! Decoding accepts masked and unmasked frames and every length form. Encoding always
//! produces server frames: unmasked, with the shortest length form.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest payload length the 64-bit length field may carry (most significant bit clear).
pub const MAX_PAYLOAD_LEN: u64 = i64::MAX as u64;

/// Decoded frame header: everything that precedes the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Extension bits. Carried through, never interpreted.
    pub rsv1: bool,
    /// See `rsv1`.
    pub rsv2: bool,
    /// See `rsv1`.
    pub rsv3: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Masking key, present iff the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
    /// Bytes taken by the header, including extended length and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Decode a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` ends inside the header
    /// - `Error::ReservedOpcode` for opcodes 0x3-0x7 and 0xB-0xF
    /// - `Error::PayloadLengthOverflow` if the 64-bit length has its top bit set
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = (byte0 & 0x80) != 0;
        let rsv1 = (byte0 & 0x40) != 0;
        let rsv2 = (byte0 & 0x20) != 0;
        let rsv3 = (byte0 & 0x10) != 0;
        let opcode = OpCode::try_from(byte0 & 0x0F)?;

        let masked = (byte1 & 0x80) != 0;
        let (payload_len, len_end) = match byte1 & 0x7F {
            126 => {
                let ext = need(buf, 4)?;
                (u64::from(u16::from_be_bytes([ext[2], ext[3]])), 4)
            }
            127 => {
                let ext = need(buf, 10)?;
                let mut be = [0u8; 8];
                be.copy_from_slice(&ext[2..10]);
                let len = u64::from_be_bytes(be);
                if len > MAX_PAYLOAD_LEN {
                    return Err(Error::PayloadLengthOverflow(len));
                }
                (len, 10)
            }
            short => (u64::from(short), 2),
        };

        let (mask, header_len) = if masked {
            let key = need(buf, len_end + 4)?;
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&key[len_end..len_end + 4]);
            (Some(mask), len_end + 4)
        } else {
            (None, len_end)
        };

        Ok(Self {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Rules every client-to-server frame must satisfy, checked before the payload is read.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` if the MASK bit is clear
    /// - `Error::FragmentedControlFrame` if a control frame has FIN clear
    /// - `Error::ControlFrameTooLarge` if a control frame payload exceeds 125 bytes
    #[allow(clippy::cast_possible_truncation)]
    pub fn check_client_frame(&self) -> Result<()> {
        if self.mask.is_none() {
            return Err(Error::UnmaskedClientFrame);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(self.payload_len as usize));
            }
        }
        Ok(())
    }

    /// Total size of the frame on the wire.
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadLengthOverflow` if the frame cannot be addressed in memory
    /// on this platform.
    pub fn frame_len(&self) -> Result<usize> {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
            .ok_or(Error::PayloadLengthOverflow(self.payload_len))
    }
}

#[inline]
fn need(buf: &[u8], len: usize) -> Result<&[u8]> {
    if buf.len() < len {
        Err(Error::IncompleteFrame {
            needed: len - buf.len(),
        })
    } else {
        Ok(&buf[..len])
    }
}

/// Size of the extended length field for a payload of `len` bytes.
#[inline]
const fn extended_len_size(len: usize) -> usize {
    if len <= 125 {
        0
    } else if len <= 0xFFFF {
        2
    } else {
        8
    }
}

/// A single WebSocket frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                 Masking key (if MASK is set)                  |
/// +---------------------------------------------------------------+
/// |                          Payload data                         |
/// +---------------------------------------------------------------+
/// ```
///
/// The payload held by a decoded frame is already unmasked; `mask` records the key the
/// peer used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Extension bit 1.
    pub rsv1: bool,
    /// Extension bit 2.
    pub rsv2: bool,
    /// Extension bit 3.
    pub rsv3: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Masking key seen on the wire, if any. Ignored when encoding.
    pub mask: Option<[u8; 4]>,
    payload: Vec<u8>,
}

impl Frame {
    /// Create an unmasked frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload,
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Close frame with an already encoded body (status code + reason, or empty).
    #[must_use]
    pub fn close(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Close, payload.into())
    }

    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Whether the frame arrived masked.
    #[inline]
    #[must_use]
    pub const fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Decode one frame from the front of `buf`, returning it with the number of bytes
    /// consumed. Masked payloads are unmasked.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` does not hold the whole frame yet
    /// - any header error from [`FrameHeader::parse`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len()?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }
        let frame = Self::from_parts(header, buf[header.header_len..total].to_vec());
        Ok((frame, total))
    }

    /// Build a frame from a parsed header and its raw (still masked) payload.
    pub(crate) fn from_parts(header: FrameHeader, mut payload: Vec<u8>) -> Self {
        if let Some(mask) = header.mask {
            apply_mask_fast(&mut payload, mask);
        }
        Self {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            mask: header.mask,
            payload,
        }
    }

    /// Exact number of bytes [`Frame::write`] appends.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        2 + extended_len_size(self.payload.len()) + self.payload.len()
    }

    /// Append the server encoding of this frame to `buf`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&self, buf: &mut BytesMut) {
        let len = self.payload.len();
        buf.reserve(self.wire_size());

        let mut byte0 = u8::from(self.opcode);
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf.put_u8(byte0);

        // MASK bit stays clear
        match extended_len_size(len) {
            0 => buf.put_u8(len as u8),
            2 => {
                buf.put_u8(126);
                buf.put_u16(len as u16);
            }
            _ => {
                buf.put_u8(127);
                buf.put_u64(len as u64);
            }
        }

        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.write(&mut buf);
        buf.to_vec()
    }
}
