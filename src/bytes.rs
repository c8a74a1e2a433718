//! Endian aware conversion between integer-like types and fixed size byte arrays.
//!
//! Endian depends on layer!! Access parameters are little endian, everything below the Access
//! Layer (and the Proxy Configuration messages) is big endian.

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Endian {
    Big,
    Little,
}

pub trait ToFromBytesEndian: Sized {
    type AsBytesType: AsRef<[u8]>;

    #[must_use]
    fn byte_size() -> usize {
        core::mem::size_of::<Self::AsBytesType>()
    }

    #[must_use]
    fn to_bytes_le(&self) -> Self::AsBytesType;

    #[must_use]
    fn to_bytes_be(&self) -> Self::AsBytesType;

    /// Returns `None` if `bytes.len() != Self::byte_size()`.
    #[must_use]
    fn from_bytes_le(bytes: &[u8]) -> Option<Self>;

    /// Returns `None` if `bytes.len() != Self::byte_size()`.
    #[must_use]
    fn from_bytes_be(bytes: &[u8]) -> Option<Self>;

    #[must_use]
    fn to_bytes_endian(&self, endian: Endian) -> Self::AsBytesType {
        match endian {
            Endian::Big => self.to_bytes_be(),
            Endian::Little => self.to_bytes_le(),
        }
    }
    #[must_use]
    fn from_bytes_endian(bytes: &[u8], endian: Endian) -> Option<Self> {
        match endian {
            Endian::Big => Self::from_bytes_be(bytes),
            Endian::Little => Self::from_bytes_le(bytes),
        }
    }
}
/// Implement ToFromEndian for all primitive types (see beneath)
macro_rules! implement_to_from_bytes {
    ( $( $t:ty ), *) => {
        $(
            impl ToFromBytesEndian for $t {
                type AsBytesType = [u8; core::mem::size_of::<Self>()];

                fn to_bytes_le(&self) -> Self::AsBytesType {
                    self.to_le_bytes()
                }

                fn to_bytes_be(&self) -> Self::AsBytesType {
                    self.to_be_bytes()
                }

                fn from_bytes_le(bytes: &[u8]) -> Option<Self> {
                    Some(Self::from_le_bytes(bytes.try_into().ok()?))
                }

                fn from_bytes_be(bytes: &[u8]) -> Option<Self> {
                    Some(Self::from_be_bytes(bytes.try_into().ok()?))
                }
            }
        )*
    }
}
implement_to_from_bytes!(u8, u16, u32, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_endians() {
        assert_eq!(0x1234_u16.to_bytes_be(), [0x12, 0x34]);
        assert_eq!(0x1234_u16.to_bytes_le(), [0x34, 0x12]);
        assert_eq!(u16::from_bytes_be(&[0x12, 0x34]), Some(0x1234));
        assert_eq!(u16::from_bytes_endian(&[0x34, 0x12], Endian::Little), Some(0x1234));
    }
    #[test]
    fn test_wrong_length() {
        assert_eq!(u32::from_bytes_be(&[1, 2, 3]), None);
        assert_eq!(u16::from_bytes_le(&[1, 2, 3]), None);
        assert_eq!(u32::byte_size(), 4);
    }
}
