//! Bluetooth Mesh Addresses.
//! All address are 16-bit except for Virtual Addresses. Virtual Address are 128-bit UUIDs but only
//! a 16-bit hash of the UUID is sent with message.
//!
//! | Bits (16)             | Type          |
//! | --------------------- | ------------- |
//! | 0b0000 0000 0000 0000 | Unassigned    |
//! | 0b0xxx xxxx xxxx xxxx | Unicast       |
//! | 0b10xx xxxx xxxx xxxx | Virtual       |
//! | 0b11xx xxxx xxxx xxxx | Group         |
//!
//! Endian depends on layer!!
//! Little: Access/Foundation
//! Big: Everything else
use crate::bytes::ToFromBytesEndian;
use crate::crypto::aes::AESCipher;
use crate::crypto::k_funcs::s1;
use core::convert::TryFrom;
use core::fmt::{Display, Formatter};

pub const ADDRESS_LEN: usize = 2;

const UNICAST_BIT: u16 = 0x8000;
const UNICAST_MASK: u16 = !UNICAST_BIT;

const GROUP_BIT: u16 = 0xC000;
const GROUP_MASK: u16 = !GROUP_BIT;

const VIRTUAL_BIT: u16 = 0x8000;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, thiserror::Error)]
#[error("invalid address {0:#06x}")]
pub struct AddressError(pub u16);

/// Element Unicast Address. Each Element has one Unicast assigned to it.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct UnicastAddress(u16);
impl UnicastAddress {
    /// Creates a new `UnicastAddress`.
    /// # Panics
    /// Panics if the `u16` is not a valid `UnicastAddress`. (Panics if `u16==0 || u16&UNICAST_BIT!=0`)
    #[must_use]
    pub fn new(v: u16) -> UnicastAddress {
        match Self::try_from(v) {
            Ok(u) => u,
            Err(_) => panic!("non unicast address '{}'", v),
        }
    }
    /// Creates a Unicast address by masking any u16 into it.
    /// # Panics
    /// Panics if the `u16` masked equals `0`.
    #[must_use]
    pub fn from_mask_u16(v: u16) -> UnicastAddress {
        assert_ne!(v & UNICAST_MASK, 0, "unassigned unicast address");
        UnicastAddress(v & UNICAST_MASK)
    }
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
    /// Returns the unicast address `offset` elements after `self` (elements of a node have
    /// consecutive addresses).
    #[must_use]
    pub fn offset(self, offset: u16) -> Option<UnicastAddress> {
        Self::try_from(self.0.checked_add(offset)?).ok()
    }
}
impl Display for UnicastAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
/// Group Address. Some Group Address are reserved.
///
/// | Values        | Group Name    |
/// | ------------- | ------------- |
/// | 0xFF00-0xFFFB | RFU           |
/// | 0xFFFC        | All Proxies   |
/// | 0xFFFD        | All Friends   |
/// | 0xFFFE        | All Relays    |
/// | 0xFFFF        | All Nodes     |
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct GroupAddress(u16);
impl GroupAddress {
    /// # Panics
    /// Panics if `group_address` isn't a value group address.
    #[must_use]
    pub fn new(group_address: u16) -> Self {
        match Self::try_from(group_address) {
            Ok(g) => g,
            Err(_) => panic!("invalid group address given"),
        }
    }
    /// Group address corresponding to all proxies nodes.
    #[must_use]
    pub const fn all_proxies() -> GroupAddress {
        GroupAddress(0xFFFC)
    }
    /// Group address corresponding to all friends nodes.
    #[must_use]
    pub const fn all_friends() -> GroupAddress {
        GroupAddress(0xFFFD)
    }
    /// Group address corresponding to all relay nodes.
    #[must_use]
    pub const fn all_relays() -> GroupAddress {
        GroupAddress(0xFFFE)
    }
    /// Group address corresponding to all nodes.
    #[must_use]
    pub const fn all_nodes() -> GroupAddress {
        GroupAddress(0xFFFF)
    }
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}
const VIRTUAL_ADDRESS_HASH_MAX: u16 = (1_u16 << 14) - 1;
/// Only stores the 14 bit hash of the virtual UUID.
/// For the full 128 bit UUID, look at [`VirtualAddress`]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct VirtualAddressHash(u16);
impl VirtualAddressHash {
    /// Creates a 14 bit `VirtualAddressHash` by masking a u16 to a u14.
    #[must_use]
    pub const fn new_masked(address: u16) -> VirtualAddressHash {
        VirtualAddressHash((address & VIRTUAL_ADDRESS_HASH_MAX) | VIRTUAL_BIT)
    }
    #[must_use]
    pub const fn just_hash(self) -> u16 {
        self.0 & VIRTUAL_ADDRESS_HASH_MAX
    }
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}
pub const LABEL_UUID_LEN: usize = 16;
/// 128-bit Label UUID backing a Virtual Address.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct LabelUUID([u8; LABEL_UUID_LEN]);
impl LabelUUID {
    #[must_use]
    pub const fn new(bytes: [u8; LABEL_UUID_LEN]) -> Self {
        Self(bytes)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let mut out = [0_u8; LABEL_UUID_LEN];
        hex::decode_to_slice(hex_str, &mut out).ok()?;
        Some(Self(out))
    }
}
impl AsRef<[u8]> for LabelUUID {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
/// Stores the 14-bit hash and full 128 bit virtual UUID. Only the 14-bit hash is sent with
/// messages over the air. During the application decryption process, the UUID is supplied to the
/// AES CCM decryptor as associated data. If the hash matches but the decryption fails (MIC doesn't
/// match), the message doesn't belong to that VirtualAddress.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct VirtualAddress(VirtualAddressHash, LabelUUID);
impl VirtualAddress {
    /// Calculates the hash of the Label UUID (AES CMAC with the "vtad" salt).
    #[must_use]
    pub fn hash_uuid(uuid: &LabelUUID) -> VirtualAddressHash {
        let k = AESCipher::from(s1("vtad")).cmac(uuid.as_ref());
        VirtualAddressHash::new_masked(u16::from_be_bytes([k.as_ref()[14], k.as_ref()[15]]))
    }
    #[must_use]
    pub fn new(uuid: &LabelUUID) -> VirtualAddress {
        VirtualAddress(Self::hash_uuid(uuid), *uuid)
    }
    #[must_use]
    pub const fn uuid(&self) -> &LabelUUID {
        &self.1
    }
    #[must_use]
    pub const fn hash(&self) -> VirtualAddressHash {
        self.0
    }
}
impl From<&LabelUUID> for VirtualAddress {
    fn from(uuid: &LabelUUID) -> Self {
        Self::new(uuid)
    }
}
impl TryFrom<u16> for UnicastAddress {
    type Error = AddressError;

    fn try_from(v: u16) -> Result<UnicastAddress, Self::Error> {
        if v != 0 && v & UNICAST_BIT == 0 {
            Ok(UnicastAddress(v))
        } else {
            Err(AddressError(v))
        }
    }
}

impl TryFrom<u16> for GroupAddress {
    type Error = AddressError;

    fn try_from(v: u16) -> Result<GroupAddress, Self::Error> {
        if v & GROUP_BIT == GROUP_BIT {
            Ok(GroupAddress(v))
        } else {
            Err(AddressError(v))
        }
    }
}

impl TryFrom<u16> for VirtualAddressHash {
    type Error = AddressError;
    fn try_from(v: u16) -> Result<VirtualAddressHash, Self::Error> {
        if v & GROUP_BIT == VIRTUAL_BIT {
            Ok(VirtualAddressHash(v))
        } else {
            Err(AddressError(v))
        }
    }
}

impl From<UnicastAddress> for u16 {
    fn from(v: UnicastAddress) -> Self {
        v.0
    }
}
impl From<GroupAddress> for u16 {
    fn from(v: GroupAddress) -> Self {
        v.0
    }
}
impl From<VirtualAddressHash> for u16 {
    fn from(v: VirtualAddressHash) -> Self {
        v.0
    }
}
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
pub enum Address {
    #[default]
    Unassigned,
    Unicast(UnicastAddress),
    Group(GroupAddress),
    Virtual(VirtualAddress),
    VirtualHash(VirtualAddressHash),
}

impl Address {
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        !matches!(self, Address::Unassigned)
    }
    #[must_use]
    pub const fn is_unicast(&self) -> bool {
        matches!(self, Address::Unicast(_))
    }
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Address::Group(_))
    }
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Address::Virtual(_) | Address::VirtualHash(_))
    }
    #[must_use]
    pub const fn virtual_hash(&self) -> Option<VirtualAddressHash> {
        match self {
            Address::Virtual(v) => Some(v.0),
            Address::VirtualHash(h) => Some(*h),
            _ => None,
        }
    }
    /// Label UUID used as associated data when encrypting for a Virtual Address.
    #[must_use]
    pub const fn label_uuid(&self) -> Option<&LabelUUID> {
        match self {
            Address::Virtual(v) => Some(&v.1),
            _ => None,
        }
    }
    #[must_use]
    pub const fn unicast(&self) -> Option<UnicastAddress> {
        match self {
            Address::Unicast(u) => Some(*u),
            _ => None,
        }
    }
    #[must_use]
    pub const fn group(&self) -> Option<GroupAddress> {
        match self {
            Address::Group(g) => Some(*g),
            _ => None,
        }
    }
    #[must_use]
    pub const fn value(&self) -> u16 {
        match self {
            Address::Unassigned => 0,
            Address::Unicast(u) => u.0,
            Address::Group(g) => g.0,
            Address::Virtual(v) => (v.0).0,
            Address::VirtualHash(vh) => vh.0,
        }
    }
    /// Returns `self` with any full Virtual Address reduced to the hash sent over the air.
    #[must_use]
    pub const fn as_wire(&self) -> Address {
        match self {
            Address::Virtual(v) => Address::VirtualHash(v.0),
            other => *other,
        }
    }
}
impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.value())
    }
}

impl From<u16> for Address {
    fn from(v: u16) -> Address {
        if v == 0 {
            Address::Unassigned
        } else if v & UNICAST_BIT == 0 {
            Address::Unicast(UnicastAddress(v))
        } else if v & GROUP_BIT == GROUP_BIT {
            Address::Group(GroupAddress(v))
        } else {
            Address::VirtualHash(VirtualAddressHash(v))
        }
    }
}
impl From<UnicastAddress> for Address {
    fn from(u: UnicastAddress) -> Self {
        Address::Unicast(u)
    }
}
impl From<GroupAddress> for Address {
    fn from(g: GroupAddress) -> Self {
        Address::Group(g)
    }
}
impl From<VirtualAddress> for Address {
    fn from(v: VirtualAddress) -> Self {
        Address::Virtual(v)
    }
}

impl From<&Address> for u16 {
    fn from(v: &Address) -> Self {
        v.value()
    }
}

impl TryFrom<&Address> for UnicastAddress {
    type Error = AddressError;

    fn try_from(value: &Address) -> Result<Self, Self::Error> {
        match value {
            Address::Unicast(u) => Ok(*u),
            _ => Err(AddressError(value.value())),
        }
    }
}
impl TryFrom<&Address> for GroupAddress {
    type Error = AddressError;

    fn try_from(value: &Address) -> Result<Self, Self::Error> {
        match value {
            Address::Group(g) => Ok(*g),
            _ => Err(AddressError(value.value())),
        }
    }
}
impl ToFromBytesEndian for Address {
    type AsBytesType = [u8; 2];

    fn to_bytes_le(&self) -> Self::AsBytesType {
        self.value().to_bytes_le()
    }

    fn to_bytes_be(&self) -> Self::AsBytesType {
        self.value().to_bytes_be()
    }

    fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
        Some(u16::from_bytes_le(bytes)?.into())
    }

    fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
        Some(u16::from_bytes_be(bytes)?.into())
    }
}

impl ToFromBytesEndian for UnicastAddress {
    type AsBytesType = [u8; 2];

    fn to_bytes_le(&self) -> Self::AsBytesType {
        (self.0).to_bytes_le()
    }

    fn to_bytes_be(&self) -> Self::AsBytesType {
        (self.0).to_bytes_be()
    }

    fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
        u16::from_bytes_le(bytes)?.try_into().ok()
    }

    fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
        u16::from_bytes_be(bytes)?.try_into().ok()
    }
}
