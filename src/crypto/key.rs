//! Crypto Keys uses for Mesh Security.
use crate::crypto::k_funcs::k4;
use crate::crypto::{hex_16_to_array, Salt, AID, AKF};
use crate::random::{self, Randomizable};
use core::fmt::{Error, Formatter, LowerHex};
use core::str::FromStr;

pub const KEY_LEN: usize = 16;

/// 128-bit AES Key.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Key([u8; KEY_LEN]);
pub const ZERO_KEY: Key = Key([0_u8; KEY_LEN]);

impl Key {
    #[must_use]
    pub const fn new(key_bytes: [u8; KEY_LEN]) -> Key {
        Key(key_bytes)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Key> {
        Some(Key::new(hex_16_to_array(hex_str)?))
    }
    #[must_use]
    pub const fn as_salt(&self) -> Salt {
        Salt::new(self.0)
    }
}
impl Randomizable for Key {
    fn random_secure() -> Self {
        Self::new(random::rand_16_bytes())
    }
}
impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl LowerHex for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", hex::encode(self.0))
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, thiserror::Error)]
#[error("key must be 32 hex characters")]
pub struct KeyError;
impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::from_hex(s).ok_or(KeyError)
    }
}
/// Network Key. Only used to derive the `NetworkKeys` (NID, encryption and privacy keys).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct NetKey(Key);

impl NetKey {
    #[must_use]
    pub const fn new(key: Key) -> Self {
        Self(key)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        Some(Self::new(Key::from_hex(hex_str)?))
    }
    #[must_use]
    pub const fn key(&self) -> &Key {
        &self.0
    }
}
impl Randomizable for NetKey {
    fn random_secure() -> Self {
        Self(Key::random_secure())
    }
}
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
pub struct EncryptionKey(Key);

impl EncryptionKey {
    #[must_use]
    pub const fn new(key: Key) -> EncryptionKey {
        EncryptionKey(key)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        Some(Self::new(Key::from_hex(hex_str)?))
    }
    #[must_use]
    pub const fn key(&self) -> Key {
        self.0
    }
}
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
pub struct PrivacyKey(Key);

impl PrivacyKey {
    #[must_use]
    pub const fn new(key: Key) -> Self {
        Self(key)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        Some(Self::new(Key::from_hex(hex_str)?))
    }
    #[must_use]
    pub const fn key(&self) -> Key {
        self.0
    }
}
/// Device Key. Secures Configuration messages between a Configuration Client and one node.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DevKey(Key);

impl DevKey {
    #[must_use]
    pub const fn new(key: Key) -> Self {
        Self(key)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        Some(Self::new(Key::from_hex(hex_str)?))
    }
    #[must_use]
    pub const fn key(&self) -> Key {
        self.0
    }
    #[must_use]
    pub const fn akf() -> AKF {
        AKF(false)
    }
}
impl Randomizable for DevKey {
    fn random_secure() -> Self {
        Self(Key::random_secure())
    }
}
#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct AppKey(Key);

impl AppKey {
    #[must_use]
    pub const fn new(key: Key) -> Self {
        Self(key)
    }
    #[must_use]
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        Some(Self::new(Key::from_hex(hex_str)?))
    }
    #[must_use]
    pub const fn key(&self) -> Key {
        self.0
    }
    /// Application Key Identifier derived with `k4`.
    #[must_use]
    pub fn aid(&self) -> AID {
        k4(self)
    }
    #[must_use]
    pub const fn akf() -> AKF {
        AKF(true)
    }
}
impl Randomizable for AppKey {
    fn random_secure() -> Self {
        Self(Key::random_secure())
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hex() {
        let key: Key = "7dd7364cd842ad18c17c2b820c84c3d6".parse().unwrap();
        assert_eq!(format!("{:x}", key), "7dd7364cd842ad18c17c2b820c84c3d6");
        assert_eq!("7dd7".parse::<Key>(), Err(KeyError));
    }
    #[test]
    fn test_random_keys_differ() {
        assert_ne!(AppKey::random_secure(), AppKey::random_secure());
    }
}
