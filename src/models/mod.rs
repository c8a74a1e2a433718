//! Model messages the stack can encode and decode. Each message type knows its own `Opcode`.
use crate::access::Opcode;

pub mod config;
pub mod generics;

/// Error when trying to pack a message into a byte buffer.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, thiserror::Error)]
pub enum MessagePackError {
    /// Byte Buffer too small to fit the whole message.
    #[error("buffer too small")]
    SmallBuffer,
    /// Incoming Byte Buffer length doesn't make sense.
    #[error("bad message length")]
    BadLength,
    /// Incoming Byte Buffer creates an invalid message.
    #[error("bad message bytes")]
    BadBytes,
    /// Message can't be packed because the object is in a bad state.
    #[error("message in a bad state")]
    BadState,
}

/// An Access Message that can be packed into a byte buffer.
/// If a message comes in that matches `Opcode`, the stack will try to decode it with
/// `PackableMessage::unpack_from`.
pub trait PackableMessage: Sized {
    fn opcode() -> Opcode;
    /// `Opcode` of the message that answers this one. Acknowledged messages return `Some` so the
    /// stack can wait for the response.
    fn response_opcode() -> Option<Opcode> {
        None
    }
    /// Bytes need to fit the entire message in bytes (excluding opcode).
    fn message_size(&self) -> usize;
    /// Pack the message into the byte buffer (without the opcode). If the length of the buffer is
    /// too small or the object is in a bad state, return `MessagePackError`.
    fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError>;
    fn pack_with_opcode(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
        let opcode = Self::opcode();
        let opcode_len = opcode.byte_len();
        if buffer.len() < opcode_len + self.message_size() {
            return Err(MessagePackError::SmallBuffer);
        }
        self.pack_into(&mut buffer[opcode_len..opcode_len + self.message_size()])?;
        opcode
            .pack_into(&mut buffer[..opcode_len])
            .map_err(|_| MessagePackError::BadState)
    }
    /// Opcode followed by the packed parameters.
    fn to_access_payload(&self) -> Result<Vec<u8>, MessagePackError> {
        let mut out = vec![0_u8; Self::opcode().byte_len() + self.message_size()];
        self.pack_with_opcode(&mut out)?;
        Ok(out)
    }
    /// Unpack the message from the byte buffer (without the opcode). Make sure to check for a valid
    /// message or return a `MessagePackError` otherwise.
    fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError>;
}
