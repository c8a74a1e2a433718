//! Common Mesh value types shared by every layer (IV Index, sequence numbers, TTL, key indexes).
use crate::bytes::ToFromBytesEndian;
use core::fmt::{Display, Error, Formatter};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct IVI(pub bool);
impl From<IVI> for bool {
    fn from(i: IVI) -> Self {
        i.0
    }
}
impl From<bool> for IVI {
    fn from(b: bool) -> Self {
        IVI(b)
    }
}
/// Network Control flag. `CTL(true)` for Control PDUs (64-bit NetMIC), `CTL(false)` for Access.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct CTL(pub bool);
impl From<CTL> for bool {
    fn from(c: CTL) -> Self {
        c.0
    }
}
impl From<bool> for CTL {
    fn from(b: bool) -> Self {
        CTL(b)
    }
}
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct TTL(u8);

pub const TTL_MASK: u8 = 127;

impl TTL {
    /// # Panics
    /// Panics if `v > 127`.
    #[must_use]
    pub fn new(v: u8) -> TTL {
        assert!(
            v <= TTL_MASK,
            "TTL {} is bigger than max TTL {}",
            v,
            TTL_MASK
        );
        TTL(v)
    }
    /// Returns u8 with 7 lower bits being TTL and the 1 highest bit being a flag
    #[must_use]
    pub const fn with_flag(self, flag: bool) -> u8 {
        self.0 | ((flag as u8) << 7)
    }
    /// returns 7 bit TTL + 1 bit bool flag from 8bit uint.
    #[must_use]
    pub const fn new_with_flag(v: u8) -> (TTL, bool) {
        (TTL(v & TTL_MASK), v & !TTL_MASK != 0)
    }
    /// Creates a 7 bit TTL by masking out the 8th bit from a u8
    #[must_use]
    pub const fn from_masked_u8(v: u8) -> TTL {
        TTL(v & TTL_MASK)
    }
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
    /// TTL 1 PDUs never leave the local node.
    #[must_use]
    pub const fn is_local_only(self) -> bool {
        self.0 == 1
    }
    #[must_use]
    pub const fn should_relay(self) -> bool {
        matches!(self.0, 2..=127)
    }
}
impl Display for TTL {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "TTL({})", self.0)
    }
}
/// 7-bit `NID` (different than `NetworkID`!!)
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct NID(u8);

impl Display for NID {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "NID({})", self.0)
    }
}
const NID_MASK: u8 = 127;

impl NID {
    /// # Panics
    /// Panics if `v > 127`.
    #[must_use]
    pub fn new(v: u8) -> NID {
        assert!(
            v <= NID_MASK,
            "NID {} is bigger than max NID {}",
            v,
            NID_MASK
        );
        NID(v)
    }
    #[must_use]
    pub const fn with_flag(self, flag: bool) -> u8 {
        self.0 | ((flag as u8) << 7)
    }
    /// Creates a 7 bit NID by masking out the 8th bit from a u8
    #[must_use]
    pub const fn from_masked_u8(v: u8) -> NID {
        NID(v & NID_MASK)
    }
    /// returns 7 bit NID + 1 bit bool flag from 8bit uint.
    #[must_use]
    pub const fn new_with_flag(v: u8) -> (NID, bool) {
        (NID(v & NID_MASK), v & !NID_MASK != 0)
    }
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

/// 24-bit Unsigned Integer. Commonly used for other 24-bit Unsigned types (`SequenceNumber`, Etc)
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct U24(u32);
pub const U24_MAX: u32 = (1_u32 << 24) - 1; // 2**24 - 1
impl Display for U24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "U24({})", self.0)
    }
}
impl U24 {
    /// # Panics
    /// Panics if `v > U24_MAX`.
    #[must_use]
    pub fn new(v: u32) -> U24 {
        assert!(v <= U24_MAX, "number {} is bigger than max U24 {}", v, U24_MAX);
        U24(v)
    }
    /// Creates a U24 by masking the 4th byte of 'v'
    #[must_use]
    pub const fn new_masked(v: u32) -> U24 {
        U24(v & U24_MAX)
    }
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}
impl ToFromBytesEndian for U24 {
    type AsBytesType = [u8; 3];

    fn to_bytes_le(&self) -> Self::AsBytesType {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    fn to_bytes_be(&self) -> Self::AsBytesType {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 3 {
            Some(U24(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])))
        } else {
            None
        }
    }

    fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 3 {
            Some(U24(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])))
        } else {
            None
        }
    }
}
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Eq, Ord, PartialOrd, PartialEq, Debug, Default, Hash)]
pub struct IVIndex(pub u32);
impl IVIndex {
    #[must_use]
    pub const fn ivi(self) -> IVI {
        IVI(self.0 & 1 == 1)
    }
    /// Returns the IV Index a received PDU with `ivi` was sent with. Either `self` (matching IVI)
    /// or the previous IV Index.
    #[must_use]
    pub const fn matching_ivi(self, ivi: IVI) -> Option<IVIndex> {
        if self.ivi().0 == ivi.0 {
            Some(self)
        } else if self.0 == 0 {
            None
        } else {
            Some(IVIndex(self.0 - 1))
        }
    }
}

impl Display for IVIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "IVIndex({})", self.0)
    }
}
impl ToFromBytesEndian for IVIndex {
    type AsBytesType = [u8; 4];

    fn to_bytes_le(&self) -> Self::AsBytesType {
        (self.0).to_bytes_le()
    }

    fn to_bytes_be(&self) -> Self::AsBytesType {
        (self.0).to_bytes_be()
    }

    fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
        Some(Self(u32::from_bytes_le(bytes)?))
    }

    fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
        Some(Self(u32::from_bytes_be(bytes)?))
    }
}
/// IV Index plus the IV Update procedure flag. During an IV Update the node keeps transmitting
/// with the old IV Index (`index - 1`) while accepting both.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct IVIndexState {
    pub index: IVIndex,
    pub update_active: bool,
}
impl IVIndexState {
    #[must_use]
    pub const fn new(index: IVIndex) -> Self {
        Self {
            index,
            update_active: false,
        }
    }
    #[must_use]
    pub const fn tx_index(&self) -> IVIndex {
        if self.update_active && self.index.0 > 0 {
            IVIndex(self.index.0 - 1)
        } else {
            self.index
        }
    }
    #[must_use]
    pub const fn rx_index(&self, ivi: IVI) -> Option<IVIndex> {
        self.index.matching_ivi(ivi)
    }
}
/// 24bit Sequence number
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Eq, Ord, PartialOrd, PartialEq, Debug, Default, Hash)]
pub struct SequenceNumber(pub U24);

impl SequenceNumber {
    #[must_use]
    pub const fn new_masked(seq: u32) -> Self {
        Self(U24::new_masked(seq))
    }
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0.value()
    }
    /// Returns the following sequence number or `None` if the 24-bit space is exhausted.
    #[must_use]
    pub const fn next(self) -> Option<SequenceNumber> {
        if self.0.value() >= U24_MAX {
            None
        } else {
            Some(SequenceNumber(U24::new_masked(self.0.value() + 1)))
        }
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "SequenceNumber({})", (self.0).value())
    }
}
impl ToFromBytesEndian for SequenceNumber {
    type AsBytesType = [u8; 3];

    fn to_bytes_le(&self) -> Self::AsBytesType {
        (self.0).to_bytes_le()
    }

    fn to_bytes_be(&self) -> Self::AsBytesType {
        (self.0).to_bytes_be()
    }

    fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
        Some(SequenceNumber(U24::from_bytes_le(bytes)?))
    }

    fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
        Some(SequenceNumber(U24::from_bytes_be(bytes)?))
    }
}
/// Sequence Authentication value. `(IVIndex << 24) | SequenceNumber`. Used for replay
/// protection. Segmented messages use the SeqAuth of their first segment.
#[derive(Copy, Clone, Eq, Ord, PartialOrd, PartialEq, Debug, Default, Hash)]
pub struct SeqAuth(u64);
impl SeqAuth {
    #[must_use]
    pub const fn new(seq: SequenceNumber, iv_index: IVIndex) -> Self {
        SeqAuth(((iv_index.0 as u64) << 24) | seq.value() as u64)
    }
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
    #[must_use]
    pub const fn iv_index(self) -> IVIndex {
        IVIndex((self.0 >> 24) as u32)
    }
    #[must_use]
    pub const fn seq(self) -> SequenceNumber {
        SequenceNumber::new_masked(self.0 as u32)
    }
}

/// Bluetooth SIG assigned Company Identifier. Little endian on the wire (vendor opcodes).
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct CompanyID(pub u16);
impl ToFromBytesEndian for CompanyID {
    type AsBytesType = [u8; 2];

    fn to_bytes_le(&self) -> Self::AsBytesType {
        (self.0).to_bytes_le()
    }

    fn to_bytes_be(&self) -> Self::AsBytesType {
        (self.0).to_bytes_be()
    }

    fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
        Some(CompanyID(u16::from_bytes_le(bytes)?))
    }

    fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
        Some(CompanyID(u16::from_bytes_be(bytes)?))
    }
}
const KEY_INDEX_MAX: u16 = (1 << 12) - 1;
/// 12-bit global Network Key Index.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub struct NetKeyIndex(u16);
impl NetKeyIndex {
    /// # Panics
    /// Panics if `index` is bigger than 12 bits.
    #[must_use]
    pub fn new(index: u16) -> Self {
        assert!(index <= KEY_INDEX_MAX, "net key index {} too big", index);
        Self(index)
    }
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}
/// 12-bit global Application Key Index.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub struct AppKeyIndex(u16);
impl AppKeyIndex {
    /// # Panics
    /// Panics if `index` is bigger than 12 bits.
    #[must_use]
    pub fn new(index: u16) -> Self {
        assert!(index <= KEY_INDEX_MAX, "app key index {} too big", index);
        Self(index)
    }
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}
