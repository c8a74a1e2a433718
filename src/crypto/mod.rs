//! Crypto functions (AES) that the Mesh uses.
//! AES is primarily used in the `crypto::k_funcs` and in network/application layer encryption.
use crate::bytes::ToFromBytesEndian;
use crate::crypto::key::Key;
use core::fmt::{Display, Error, Formatter};

pub mod aes;
pub mod k_funcs;
pub mod key;
pub mod materials;
pub mod nonce;

pub use k_funcs::{k1, k2, k3, k4, s1};

/// Helper function to convert a 16 byte (32 character) hex string to 16 byte array.
/// Returns `None` if `hex.len() != 32` or if `hex` contains non-hex characters.
#[must_use]
pub fn hex_16_to_array(hex_str: &str) -> Option<[u8; 16]> {
    let mut out = [0_u8; 16];
    hex::decode_to_slice(hex_str, &mut out).ok()?;
    Some(out)
}

const BIG_MIC_SIZE: usize = 8;
const SMALL_MIC_SIZE: usize = 4;

/// Message Integrity Check. 32-bit or 64-bit tag produced by AES-CCM.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum MIC {
    Big(u64),
    Small(u32),
}
impl MIC {
    #[must_use]
    pub fn try_from_bytes_be(bytes: &[u8]) -> Option<MIC> {
        match bytes.len() {
            SMALL_MIC_SIZE => Some(MIC::Small(u32::from_bytes_be(bytes)?)),
            BIG_MIC_SIZE => Some(MIC::Big(u64::from_bytes_be(bytes)?)),
            _ => None,
        }
    }
    #[must_use]
    pub const fn mic(&self) -> u64 {
        match self {
            MIC::Big(b) => *b,
            MIC::Small(s) => *s as u64,
        }
    }
    #[must_use]
    pub const fn is_big(&self) -> bool {
        matches!(self, MIC::Big(_))
    }
    #[must_use]
    pub const fn mic_size(&self) -> MicSize {
        match self {
            MIC::Big(_) => MicSize::Big,
            MIC::Small(_) => MicSize::Small,
        }
    }
    /// Return the size in bytes (4 or 8) needed to represent the MIC.
    /// ```
    /// use mesh_stack::crypto::MIC;
    /// assert_eq!(MIC::Big(0u64).byte_size(), 8);
    /// assert_eq!(MIC::Small(0u32).byte_size(), 4);
    /// ```
    #[must_use]
    pub const fn byte_size(&self) -> usize {
        self.mic_size().byte_size()
    }
    /// Appends the big endian MIC bytes to `out`.
    pub fn extend_be(&self, out: &mut Vec<u8>) {
        match self {
            MIC::Big(b) => out.extend_from_slice(&b.to_be_bytes()),
            MIC::Small(s) => out.extend_from_slice(&s.to_be_bytes()),
        }
    }
}
impl Display for MIC {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let (name, value) = match self {
            MIC::Big(b) => ("Big", *b),
            MIC::Small(s) => ("Small", u64::from(*s)),
        };
        write!(f, "{}({:#x})", name, value)
    }
}
/// Size of the Transport or Network MIC.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Debug, Hash, Default)]
pub enum MicSize {
    Big,
    #[default]
    Small,
}
impl MicSize {
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            MicSize::Big => BIG_MIC_SIZE,
            MicSize::Small => SMALL_MIC_SIZE,
        }
    }
    #[must_use]
    pub const fn is_big(self) -> bool {
        matches!(self, MicSize::Big)
    }
}
impl From<bool> for MicSize {
    /// `true` (SZMIC/ASZMIC bit set) is a 64-bit MIC.
    fn from(big: bool) -> Self {
        if big {
            MicSize::Big
        } else {
            MicSize::Small
        }
    }
}

/// 6 bit Application Key ID
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
pub struct AID(u8);
const AID_MAX: u8 = (1 << 6) - 1;

impl AID {
    /// Creates a new 6 bit `AID`
    /// # Panics
    /// Panics if `aid > AID_MAX` (63)
    #[must_use]
    pub fn new(aid: u8) -> AID {
        assert!(aid <= AID_MAX, "AID {} bigger than 6 bits", aid);
        AID(aid)
    }
    /// Creates a AID by masking `aid` to just 6 (lower) bits
    #[must_use]
    pub const fn new_masked(aid: u8) -> AID {
        AID(aid & AID_MAX)
    }
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}
/// Application Key Flag. `AKF(true)` means an Application Key secures the access payload,
/// `AKF(false)` means the Device Key does.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
pub struct AKF(pub bool);
impl From<bool> for AKF {
    fn from(b: bool) -> Self {
        AKF(b)
    }
}
impl From<AKF> for bool {
    fn from(a: AKF) -> Self {
        a.0
    }
}
const SALT_LEN: usize = 16;
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    #[must_use]
    pub const fn new(salt: [u8; SALT_LEN]) -> Salt {
        Salt(salt)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Salt> {
        Some(Salt::new(hex_16_to_array(hex_str)?))
    }
    #[must_use]
    pub const fn as_key(&self) -> Key {
        Key::new(self.0)
    }
}
impl AsRef<[u8]> for Salt {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum KeyRefreshPhases {
    Normal,
    First,
    Second,
}
