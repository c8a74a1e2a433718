//! Bluetooth Mesh Control Layer. Transport Control messages carried in `CTL(true)` Network PDUs.

use crate::lower::{BlockAck, SeqZero, UnsegmentedControlPDU};
use core::convert::TryFrom;

/// 7 Bit Control Opcode
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
#[repr(u8)]
pub enum ControlOpcode {
    Ack = 0x00, // Handled by the lower transport layer.
    FriendPoll = 0x01,
    FriendUpdate = 0x02,
    FriendRequest = 0x03,
    FriendOffer = 0x04,
    FriendClear = 0x05,
    FriendClearConfirm = 0x06,
    FriendSubscriptionListAdd = 0x07,
    FriendSubscriptionListRemove = 0x08,
    FriendSubscriptionListConfirm = 0x09,
    Heartbeat = 0x0A,
}
impl ControlOpcode {
    /// Returns `None` for RFU opcodes (`0x0B..=0x7F`) and values bigger than 7 bits.
    #[must_use]
    pub fn new(opcode: u8) -> Option<Self> {
        match opcode {
            0x00 => Some(ControlOpcode::Ack),
            0x01 => Some(ControlOpcode::FriendPoll),
            0x02 => Some(ControlOpcode::FriendUpdate),
            0x03 => Some(ControlOpcode::FriendRequest),
            0x04 => Some(ControlOpcode::FriendOffer),
            0x05 => Some(ControlOpcode::FriendClear),
            0x06 => Some(ControlOpcode::FriendClearConfirm),
            0x07 => Some(ControlOpcode::FriendSubscriptionListAdd),
            0x08 => Some(ControlOpcode::FriendSubscriptionListRemove),
            0x09 => Some(ControlOpcode::FriendSubscriptionListConfirm),
            0x0A => Some(ControlOpcode::Heartbeat),
            _ => None,
        }
    }
}
impl From<ControlOpcode> for u8 {
    fn from(opcode: ControlOpcode) -> Self {
        opcode as u8
    }
}
/// Control opcode plus its raw parameters. What the lower transport layer hands up after
/// (optional) reassembly.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ControlPayload<Storage: AsRef<[u8]>> {
    pub opcode: ControlOpcode,
    pub payload: Storage,
}
/// Decoded Control PDUs. Friendship messages are carried raw.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum ControlPDU {
    Ack(Ack),
    Heartbeat(Heartbeat),
    Other(ControlPayload<Vec<u8>>),
}
impl ControlPDU {
    pub fn try_unpack(opcode: ControlOpcode, payload: &[u8]) -> Result<Self, ControlMessageError> {
        ControlPDU::try_from(&ControlPayload { opcode, payload })
    }
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ControlPDU::Ack(pdu) => pdu.byte_len(),
            ControlPDU::Heartbeat(pdu) => pdu.byte_len(),
            ControlPDU::Other(payload) => payload.payload.len(),
        }
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    #[must_use]
    pub fn opcode(&self) -> ControlOpcode {
        match self {
            ControlPDU::Ack(_) => Ack::OPCODE,
            ControlPDU::Heartbeat(_) => Heartbeat::OPCODE,
            ControlPDU::Other(payload) => payload.opcode,
        }
    }
    pub fn to_vec_payload(&self) -> Result<ControlPayload<Vec<u8>>, ControlMessageError> {
        let mut payload = vec![0_u8; self.len()];
        match self {
            ControlPDU::Ack(pdu) => pdu.pack(&mut payload)?,
            ControlPDU::Heartbeat(pdu) => pdu.pack(&mut payload)?,
            ControlPDU::Other(other) => payload.copy_from_slice(&other.payload),
        }
        Ok(ControlPayload {
            opcode: self.opcode(),
            payload,
        })
    }
}
impl<Storage: AsRef<[u8]>> TryFrom<&ControlPayload<Storage>> for ControlPDU {
    type Error = ControlMessageError;

    fn try_from(value: &ControlPayload<Storage>) -> Result<Self, Self::Error> {
        let buf = value.payload.as_ref();
        Ok(match value.opcode {
            ControlOpcode::Ack => ControlPDU::Ack(Ack::unpack(buf)?),
            ControlOpcode::Heartbeat => ControlPDU::Heartbeat(Heartbeat::unpack(buf)?),
            opcode => ControlPDU::Other(ControlPayload {
                opcode,
                payload: buf.to_vec(),
            }),
        })
    }
}
impl TryFrom<&UnsegmentedControlPDU> for ControlPDU {
    type Error = ControlMessageError;

    fn try_from(value: &UnsegmentedControlPDU) -> Result<Self, Self::Error> {
        ControlPDU::try_from(&ControlPayload {
            opcode: value.opcode(),
            payload: value.data(),
        })
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, thiserror::Error)]
pub enum ControlMessageError {
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("bad control message bytes")]
    BadBytes,
    #[error("bad control message length")]
    BadLength,
    #[error("wrong control opcode")]
    BadOpcode,
}
pub trait ControlMessage: Sized {
    const OPCODE: ControlOpcode;
    fn byte_len(&self) -> usize;
    fn unpack(buf: &[u8]) -> Result<Self, ControlMessageError>;
    fn pack(&self, buf: &mut [u8]) -> Result<(), ControlMessageError>;
    fn try_from_pdu(value: &UnsegmentedControlPDU) -> Result<Self, ControlMessageError> {
        if value.opcode() == Self::OPCODE {
            Self::unpack(value.data())
        } else {
            Err(ControlMessageError::BadOpcode)
        }
    }
    fn to_unsegmented(&self) -> Result<UnsegmentedControlPDU, ControlMessageError> {
        let mut buf = vec![0_u8; self.byte_len()];
        self.pack(&mut buf)?;
        UnsegmentedControlPDU::new(Self::OPCODE, &buf).ok_or(ControlMessageError::BadLength)
    }
}
/// Segment Acknowledgment message.
/// | OBO (1) | SeqZero (13) | RFU (2) | BlockAck (32) |
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct Ack {
    /// Set when a Friend node acknowledges on behalf of a Low Power node.
    pub obo: bool,
    pub seq_zero: SeqZero,
    pub block_ack: BlockAck,
}
impl Ack {
    /// An Ack with an empty `BlockAck` tells the sender the receiver is busy and can't accept
    /// the segmented message.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.block_ack.value() == 0
    }
}
impl ControlMessage for Ack {
    const OPCODE: ControlOpcode = ControlOpcode::Ack;

    fn byte_len(&self) -> usize {
        6
    }

    fn unpack(buf: &[u8]) -> Result<Self, ControlMessageError> {
        if buf.len() != 6 {
            Err(ControlMessageError::BadLength)
        } else {
            let header = u16::from_be_bytes([buf[0], buf[1]]);
            Ok(Self {
                obo: header & 0x8000 != 0,
                seq_zero: SeqZero::new_masked(header >> 2),
                block_ack: BlockAck::new(u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]])),
            })
        }
    }

    fn pack(&self, buf: &mut [u8]) -> Result<(), ControlMessageError> {
        if buf.len() < self.byte_len() {
            return Err(ControlMessageError::BufferTooSmall);
        }
        let header = (u16::from(self.obo) << 15) | (self.seq_zero.value() << 2);
        buf[..2].copy_from_slice(&header.to_be_bytes());
        buf[2..6].copy_from_slice(&self.block_ack.value().to_be_bytes());
        Ok(())
    }
}
/// Heartbeat features bit field.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
pub struct Features(pub u16);
impl Features {
    pub const RELAY: u16 = 0x0001;
    pub const PROXY: u16 = 0x0002;
    pub const FRIEND: u16 = 0x0004;
    pub const LOW_POWER: u16 = 0x0008;
    #[must_use]
    pub const fn relay(self) -> bool {
        self.0 & Self::RELAY != 0
    }
    #[must_use]
    pub const fn proxy(self) -> bool {
        self.0 & Self::PROXY != 0
    }
    #[must_use]
    pub const fn friend(self) -> bool {
        self.0 & Self::FRIEND != 0
    }
    #[must_use]
    pub const fn low_power(self) -> bool {
        self.0 & Self::LOW_POWER != 0
    }
}
/// | RFU (1) | InitTTL (7) | Features (16) |
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct Heartbeat {
    pub init_ttl: u8,
    pub features: Features,
}
impl Heartbeat {
    /// Hops the heartbeat travelled given the TTL it arrived with.
    #[must_use]
    pub const fn hops(&self, rx_ttl: u8) -> u8 {
        self.init_ttl.saturating_sub(rx_ttl).saturating_add(1)
    }
}
impl ControlMessage for Heartbeat {
    const OPCODE: ControlOpcode = ControlOpcode::Heartbeat;

    fn byte_len(&self) -> usize {
        3
    }

    fn unpack(buf: &[u8]) -> Result<Self, ControlMessageError> {
        match *buf {
            [ttl, f0, f1] => Ok(Heartbeat {
                init_ttl: ttl & 0x7F,
                features: Features(u16::from_be_bytes([f0, f1])),
            }),
            _ => Err(ControlMessageError::BadLength),
        }
    }

    fn pack(&self, buf: &mut [u8]) -> Result<(), ControlMessageError> {
        if buf.len() < self.byte_len() {
            return Err(ControlMessageError::BufferTooSmall);
        }
        buf[0] = self.init_ttl & 0x7F;
        buf[1..3].copy_from_slice(&self.features.0.to_be_bytes());
        Ok(())
    }
}
