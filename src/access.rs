//! Access Layer between Models and the rest of the stack (Transport, Network, etc). The most
//! surface layer of the stack.
//!
//! | Octet 0     | Opcode Size | Form                                  |
//! | ----------- | ----------- | ------------------------------------- |
//! | 0b0xxx_xxxx | 1           | SIG (0x7F is RFU)                     |
//! | 0b10xx_xxxx | 2           | SIG                                   |
//! | 0b11xx_xxxx | 3           | Vendor (6-bit opcode + Company ID LE) |
use crate::address::{Address, UnicastAddress};
use crate::bytes::ToFromBytesEndian;
use crate::mesh::CompanyID;
use crate::models::config::messages::{default_ttl, node_reset};
use crate::models::generics::onoff;
use crate::models::{MessagePackError, PackableMessage};
use core::any::Any;
use core::fmt::{Debug, Display, Formatter};
use std::collections::{btree_map, BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum SigOpcode {
    SingleOctet(u8),
    DoubleOctet(u16),
}
impl SigOpcode {
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        match self {
            SigOpcode::SingleOctet(_) => 1,
            SigOpcode::DoubleOctet(_) => 2,
        }
    }
}
impl From<SigOpcode> for Opcode {
    fn from(opcode: SigOpcode) -> Self {
        Opcode::SIG(opcode)
    }
}
const VENDOR_OPCODE_MAX: u8 = (1_u8 << 6) - 1;
/// 6 bit Vendor Opcode
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct VendorOpcode(u8);
impl VendorOpcode {
    /// # Panics
    /// Panics if `opcode` doesn't fit in 6 bits.
    #[must_use]
    pub fn new(opcode: u8) -> Self {
        assert!(opcode <= VENDOR_OPCODE_MAX, "vendor opcode {} too big", opcode);
        VendorOpcode(opcode)
    }
    #[must_use]
    pub const fn new_masked(opcode: u8) -> Self {
        VendorOpcode(opcode & VENDOR_OPCODE_MAX)
    }
}
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, thiserror::Error)]
#[error("invalid opcode")]
pub struct OpcodeConversationError;
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    SIG(SigOpcode),
    Vendor(VendorOpcode, CompanyID),
}
pub const OPCODE_MAX_LEN: usize = 3;
impl Opcode {
    #[must_use]
    pub const fn company_id(&self) -> Option<CompanyID> {
        match self {
            Opcode::Vendor(_, cid) => Some(*cid),
            Opcode::SIG(_) => None,
        }
    }
    #[must_use]
    pub const fn is_vendor(&self) -> bool {
        matches!(self, Opcode::Vendor(_, _))
    }
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        match self {
            Opcode::SIG(o) => o.byte_len(),
            Opcode::Vendor(_, _) => 3,
        }
    }
    /// Logical 24-bit value of the opcode (the opcode octets read as a big endian integer).
    #[must_use]
    pub fn value(&self) -> u32 {
        match self {
            Opcode::SIG(SigOpcode::SingleOctet(s)) => u32::from(*s),
            Opcode::SIG(SigOpcode::DoubleOctet(d)) => u32::from(*d),
            Opcode::Vendor(op, cid) => {
                let cid = cid.to_bytes_le();
                u32::from_be_bytes([0, op.0 | 0xC0, cid[0], cid[1]])
            }
        }
    }
    /// Converts a logical opcode value into its typed form, picking the width by magnitude.
    /// Values in `0x80..0x4000` take the two octet form `0x8000 | value`, so `0x0201` and
    /// `0x8201` both encode as `[0x82, 0x01]`.
    /// Returns `None` for values outside every width class (including the RFU `0x7F`).
    #[must_use]
    pub fn from_value(value: u32) -> Option<Opcode> {
        match value {
            0x00..=0x7E => Some(Opcode::SIG(SigOpcode::SingleOctet(value as u8))),
            0x80..=0x3FFF => Some(Opcode::SIG(SigOpcode::DoubleOctet(0x8000 | value as u16))),
            0x8000..=0xBFFF => Some(Opcode::SIG(SigOpcode::DoubleOctet(value as u16))),
            0x00C0_0000..=0x00FF_FFFF => {
                let [_, op, cid_0, cid_1] = value.to_be_bytes();
                Some(Opcode::Vendor(
                    VendorOpcode::new_masked(op),
                    CompanyID(u16::from_le_bytes([cid_0, cid_1])),
                ))
            }
            _ => None,
        }
    }
    /// Reads the opcode at the start of `bytes` and returns it with the remaining parameters.
    pub fn unpack_from(bytes: &[u8]) -> Result<(Self, &[u8]), OpcodeConversationError> {
        let first = *bytes.first().ok_or(OpcodeConversationError)?;
        if first == 0x7F {
            // This opcode is RFU
            Err(OpcodeConversationError)
        } else if first & 0x80 == 0 {
            Ok((Opcode::SIG(SigOpcode::SingleOctet(first)), &bytes[1..]))
        } else if first & 0xC0 == 0xC0 {
            if bytes.len() < 3 {
                return Err(OpcodeConversationError);
            }
            let vendor_opcode = VendorOpcode::new_masked(first);
            let company_id =
                CompanyID::from_bytes_le(&bytes[1..3]).ok_or(OpcodeConversationError)?;
            Ok((Opcode::Vendor(vendor_opcode, company_id), &bytes[3..]))
        } else {
            if bytes.len() < 2 {
                return Err(OpcodeConversationError);
            }
            Ok((
                Opcode::SIG(SigOpcode::DoubleOctet(u16::from_be_bytes([
                    bytes[0], bytes[1],
                ]))),
                &bytes[2..],
            ))
        }
    }
    pub fn pack_into(&self, buffer: &mut [u8]) -> Result<(), OpcodeConversationError> {
        if buffer.len() < self.byte_len() {
            return Err(OpcodeConversationError);
        }
        match *self {
            Opcode::SIG(SigOpcode::SingleOctet(s)) => {
                if s & 0x80 == 0 && s != 0x7F {
                    buffer[0] = s;
                    Ok(())
                } else {
                    Err(OpcodeConversationError)
                }
            }
            Opcode::SIG(SigOpcode::DoubleOctet(d)) => {
                if d & 0xC000 == 0x8000 {
                    buffer[..2].copy_from_slice(&d.to_be_bytes()[..]);
                    Ok(())
                } else {
                    Err(OpcodeConversationError)
                }
            }
            Opcode::Vendor(opcode, company_id) => {
                buffer[0] = opcode.0 | 0xC0;
                buffer[1..3].copy_from_slice(&company_id.to_bytes_le()[..]);
                Ok(())
            }
        }
    }
    pub fn to_bytes(&self) -> Result<Vec<u8>, OpcodeConversationError> {
        let mut out = vec![0_u8; self.byte_len()];
        self.pack_into(&mut out)?;
        Ok(out)
    }
}
impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "Opcode({:#x})", self.value())
    }
}
/// Encodes a logical opcode value into 1, 2 or 3 octets.
#[must_use]
pub fn encode_opcode(opcode: u32) -> Option<Vec<u8>> {
    Opcode::from_value(opcode)?.to_bytes().ok()
}
/// Decodes the opcode at the start of `bytes` into its logical value and the remaining
/// parameters.
#[must_use]
pub fn decode_opcode(bytes: &[u8]) -> Option<(u32, &[u8])> {
    let (opcode, rest) = Opcode::unpack_from(bytes).ok()?;
    Some((opcode.value(), rest))
}

/// Access Layer PDU. Opcode + Parameters addressed from a local or remote element.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AccessPdu {
    pub src: UnicastAddress,
    pub dst: Address,
    payload: Vec<u8>,
}
impl AccessPdu {
    pub fn new(
        src: UnicastAddress,
        dst: Address,
        opcode: Opcode,
        parameters: &[u8],
    ) -> Result<Self, OpcodeConversationError> {
        let mut payload = opcode.to_bytes()?;
        payload.extend_from_slice(parameters);
        Ok(Self { src, dst, payload })
    }
    /// Wraps an already encoded Access payload (opcode + parameters).
    pub fn from_payload(
        src: UnicastAddress,
        dst: Address,
        payload: Vec<u8>,
    ) -> Result<Self, OpcodeConversationError> {
        Opcode::unpack_from(&payload)?;
        Ok(Self { src, dst, payload })
    }
    pub fn from_message<M: PackableMessage>(
        src: UnicastAddress,
        dst: Address,
        message: &M,
    ) -> Result<Self, MessagePackError> {
        Ok(Self {
            src,
            dst,
            payload: message.to_access_payload()?,
        })
    }
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
    /// Opcode of the payload. Construction guarantees the opcode is valid.
    #[must_use]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::unpack_from(&self.payload).ok().map(|(o, _)| o)
    }
    #[must_use]
    pub fn parameters(&self) -> &[u8] {
        Opcode::unpack_from(&self.payload)
            .map(|(_, p)| p)
            .unwrap_or_default()
    }
}

/// Decoded message that doesn't have a variant in [`KnownMessage`]. Added to a
/// [`MessageRegistry`] with [`MessageRegistry::register`].
pub trait ModelMessage: Debug + Send + Sync + 'static {
    fn message_opcode(&self) -> Opcode;
    fn as_any(&self) -> &dyn Any;
}
impl<M: PackableMessage + Debug + Send + Sync + 'static> ModelMessage for M {
    fn message_opcode(&self) -> Opcode {
        M::opcode()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}
/// Closed set of messages the stack understands, plus registered and unknown messages.
#[derive(Clone, Debug)]
pub enum KnownMessage {
    ConfigNodeReset(node_reset::Reset),
    ConfigNodeResetStatus(node_reset::Status),
    ConfigDefaultTTLGet(default_ttl::Get),
    ConfigDefaultTTLSet(default_ttl::Set),
    ConfigDefaultTTLStatus(default_ttl::Status),
    GenericOnOffGet(onoff::Get),
    GenericOnOffSet(onoff::Set),
    GenericOnOffSetUnacknowledged(onoff::SetUnacknowledged),
    GenericOnOffStatus(onoff::Status),
    Registered(Arc<dyn ModelMessage>),
    Unknown { opcode: Opcode, parameters: Vec<u8> },
}
impl KnownMessage {
    /// Downcasts a registered message.
    #[must_use]
    pub fn registered<M: ModelMessage>(&self) -> Option<&M> {
        match self {
            KnownMessage::Registered(m) => m.as_any().downcast_ref::<M>(),
            _ => None,
        }
    }
}
pub type DecodeFn = fn(&[u8]) -> Result<KnownMessage, MessagePackError>;

fn decode_registered<M: PackableMessage + Debug + Send + Sync + 'static>(
    parameters: &[u8],
) -> Result<KnownMessage, MessagePackError> {
    Ok(KnownMessage::Registered(Arc::new(M::unpack_from(
        parameters,
    )?)))
}
macro_rules! decode_known {
    ($variant:ident, $message:ty) => {
        |parameters: &[u8]| -> Result<KnownMessage, MessagePackError> {
            Ok(KnownMessage::$variant(<$message>::unpack_from(parameters)?))
        }
    };
}

/// Opcode -> decode function table.
#[derive(Clone, Debug)]
pub struct MessageRegistry {
    decoders: HashMap<Opcode, DecodeFn>,
}
impl MessageRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
    /// Registry with every [`KnownMessage`] variant registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert(
            node_reset::Reset::opcode(),
            decode_known!(ConfigNodeReset, node_reset::Reset),
        );
        registry.insert(
            node_reset::Status::opcode(),
            decode_known!(ConfigNodeResetStatus, node_reset::Status),
        );
        registry.insert(
            default_ttl::Get::opcode(),
            decode_known!(ConfigDefaultTTLGet, default_ttl::Get),
        );
        registry.insert(
            default_ttl::Set::opcode(),
            decode_known!(ConfigDefaultTTLSet, default_ttl::Set),
        );
        registry.insert(
            default_ttl::Status::opcode(),
            decode_known!(ConfigDefaultTTLStatus, default_ttl::Status),
        );
        registry.insert(
            onoff::Get::opcode(),
            decode_known!(GenericOnOffGet, onoff::Get),
        );
        registry.insert(
            onoff::Set::opcode(),
            decode_known!(GenericOnOffSet, onoff::Set),
        );
        registry.insert(
            onoff::SetUnacknowledged::opcode(),
            decode_known!(GenericOnOffSetUnacknowledged, onoff::SetUnacknowledged),
        );
        registry.insert(
            onoff::Status::opcode(),
            decode_known!(GenericOnOffStatus, onoff::Status),
        );
        registry
    }
    /// Adds (or replaces) the decode function for `opcode`.
    pub fn insert(&mut self, opcode: Opcode, decode: DecodeFn) -> Option<DecodeFn> {
        self.decoders.insert(opcode, decode)
    }
    /// Registers `M` so incoming messages with its opcode decode to [`KnownMessage::Registered`].
    pub fn register<M: PackableMessage + Debug + Send + Sync + 'static>(&mut self) {
        self.insert(M::opcode(), decode_registered::<M>);
    }
    #[must_use]
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.decoders.contains_key(&opcode)
    }
    /// Decodes an Access payload. Unregistered opcodes become [`KnownMessage::Unknown`].
    pub fn decode(&self, payload: &[u8]) -> Result<KnownMessage, MessagePackError> {
        let (opcode, parameters) =
            Opcode::unpack_from(payload).map_err(|_| MessagePackError::BadBytes)?;
        match self.decoders.get(&opcode) {
            Some(decode) => decode(parameters),
            None => Ok(KnownMessage::Unknown {
                opcode,
                parameters: parameters.to_vec(),
            }),
        }
    }
}
impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of one send operation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct MessageId(pub u64);
/// Returned to callers of a send so the send can be identified (completion events) or cancelled.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct MessageHandle {
    pub id: MessageId,
    pub opcode: Opcode,
    pub src: UnicastAddress,
    pub dst: Address,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct PendingResponse {
    pub handle: MessageHandle,
    pub response_opcode: Opcode,
}
/// Acknowledged messages waiting for their response. Keyed by the send's `MessageId`; a
/// response matches when it is addressed to the request's source, carries the expected response
/// opcode and (for unicast requests) comes from the request's destination. The first response to
/// a group or virtual request completes it.
#[derive(Clone, Debug, Default)]
pub struct PendingResponses {
    pending: BTreeMap<MessageId, PendingResponse>,
}
impl PendingResponses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Whether a request from `src` to `dst` already waits for `response_opcode`. A response
    /// couldn't tell two such requests apart.
    #[must_use]
    pub fn is_waiting(&self, src: UnicastAddress, dst: Address, response_opcode: Opcode) -> bool {
        self.pending.values().any(|p| {
            p.handle.src == src && p.handle.dst == dst && p.response_opcode == response_opcode
        })
    }
    /// Returns `false` if an identical request (same source, destination and response opcode) is
    /// already waiting.
    pub fn insert(&mut self, handle: MessageHandle, response_opcode: Opcode) -> bool {
        if self.is_waiting(handle.src, handle.dst, response_opcode) {
            return false;
        }
        match self.pending.entry(handle.id) {
            btree_map::Entry::Vacant(v) => {
                v.insert(PendingResponse {
                    handle,
                    response_opcode,
                });
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }
    /// Removes and returns the pending request answered by a message `opcode` from `src` to
    /// `dst`.
    pub fn take_response(
        &mut self,
        src: UnicastAddress,
        dst: Address,
        opcode: Opcode,
    ) -> Option<PendingResponse> {
        let id = self
            .pending
            .values()
            .find(|p| {
                p.response_opcode == opcode
                    && Address::Unicast(p.handle.src) == dst
                    && (!p.handle.dst.is_unicast() || p.handle.dst == Address::Unicast(src))
            })?
            .handle
            .id;
        self.pending.remove(&id)
    }
    pub fn remove(&mut self, id: MessageId) -> Option<PendingResponse> {
        self.pending.remove(&id)
    }
    #[must_use]
    pub fn contains(&self, id: MessageId) -> bool {
        self.pending.contains_key(&id)
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
