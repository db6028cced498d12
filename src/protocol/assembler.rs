//! Reassembly of fragmented data frames into messages (RFC 6455 §5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{Frame, OpCode};

/// Collects data frames until one carries FIN, then yields the complete [`Message`].
///
/// Control frames are not part of any message and are ignored here; the connection
/// reader handles them before they reach the assembler.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    limits: Limits,
}

impl MessageAssembler {
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            limits,
        }
    }

    /// Add a frame to the message being assembled.
    ///
    /// Returns `Some(message)` once a frame with FIN completes it, `None` while more
    /// fragments are expected.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` for a continuation with nothing to continue, or a new
    ///   Text/Binary frame while a fragmented message is still open
    /// - `TooManyFragments` / `MessageTooLarge` when the limits are exceeded
    /// - `InvalidUtf8` when a completed text message is not valid UTF-8
    ///
    /// On error the partial message is discarded.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        let result = self.push_inner(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn push_inner(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        if frame.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
        } else {
            if self.opcode.is_some() {
                return Err(Error::ProtocolViolation(
                    "Expected continuation frame".into(),
                ));
            }
            self.opcode = Some(frame.opcode);
        }

        self.limits.check_fragment_count(self.fragment_count + 1)?;

        let new_size = self.buffer.len() + frame.payload().len();
        self.limits.check_message_size(new_size)?;

        self.buffer.extend_from_slice(frame.payload());
        self.fragment_count += 1;

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        self.fragment_count = 0;
        match self.opcode.take() {
            Some(OpCode::Text) => String::from_utf8(payload)
                .map(|text| Some(Message::Text(text)))
                .map_err(|_| Error::InvalidUtf8),
            _ => Ok(Some(Message::Binary(payload))),
        }
    }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
    }
}
