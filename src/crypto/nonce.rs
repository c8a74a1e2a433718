//! 13-byte AES-CCM nonces used by the Network, Upper Transport and Proxy layers.
//!
//! | Nonce       | Type | Flags          | SEQ | SRC | DST     | IV Index |
//! | ----------- | ---- | -------------- | --- | --- | ------- | -------- |
//! | Network     | 0x00 | CTL \| TTL     | 3   | 2   | 0x0000  | 4        |
//! | Application | 0x01 | ASZMIC \| 0    | 3   | 2   | 2       | 4        |
//! | Device      | 0x02 | ASZMIC \| 0    | 3   | 2   | 2       | 4        |
//! | Proxy       | 0x03 | 0x00           | 3   | 2   | 0x0000  | 4        |
//!
//! Every field is big endian.
use crate::address::{Address, UnicastAddress};
use crate::bytes::ToFromBytesEndian;
use crate::mesh::{IVIndex, SequenceNumber, CTL, TTL};

pub const NONCE_LEN: usize = 13;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialOrd, PartialEq, Ord)]
pub struct Nonce([u8; NONCE_LEN]);
impl Nonce {
    #[must_use]
    pub const fn new(bytes: [u8; NONCE_LEN]) -> Nonce {
        Nonce(bytes)
    }
    /// Returns `None` for the reserved types (0x04-0xFF).
    #[must_use]
    pub const fn nonce_type(&self) -> Option<NonceType> {
        match self.0[0] {
            0x00 => Some(NonceType::Network),
            0x01 => Some(NonceType::Application),
            0x02 => Some(NonceType::Device),
            0x03 => Some(NonceType::Proxy),
            _ => None,
        }
    }
    fn build(
        nonce_type: NonceType,
        flags: u8,
        seq: SequenceNumber,
        src: UnicastAddress,
        dst: u16,
        iv_index: IVIndex,
    ) -> Nonce {
        let mut out = [0_u8; NONCE_LEN];
        out[0] = nonce_type.as_u8();
        out[1] = flags;
        out[2..5].copy_from_slice(&seq.to_bytes_be());
        out[5..7].copy_from_slice(&src.to_bytes_be());
        out[7..9].copy_from_slice(&dst.to_be_bytes());
        out[9..13].copy_from_slice(&iv_index.to_bytes_be());
        Nonce(out)
    }
}
impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}
/// Nonce Types
/// 0x04--0xFF RFU
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum NonceType {
    Network = 0x00,
    Application = 0x01,
    Device = 0x02,
    Proxy = 0x03,
}
impl NonceType {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct NetworkNonceParts {
    pub ctl: CTL,
    pub ttl: TTL,
    pub seq: SequenceNumber,
    pub src: UnicastAddress,
    pub iv_index: IVIndex,
}

impl NetworkNonceParts {
    #[must_use]
    pub const fn new(
        ctl: CTL,
        ttl: TTL,
        seq: SequenceNumber,
        src: UnicastAddress,
        iv_index: IVIndex,
    ) -> Self {
        Self {
            ctl,
            ttl,
            seq,
            src,
            iv_index,
        }
    }
    #[must_use]
    pub fn to_nonce(&self) -> Nonce {
        Nonce::build(
            NonceType::Network,
            self.ttl.with_flag(self.ctl.0),
            self.seq,
            self.src,
            0,
            self.iv_index,
        )
    }
}
/// Fields shared by the Application and Device nonces. `aszmic` is only set for segmented
/// access messages with a 64-bit TransMIC.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct AccessNonceParts {
    pub aszmic: bool,
    pub seq: SequenceNumber,
    pub src: UnicastAddress,
    pub dst: Address,
    pub iv_index: IVIndex,
}
impl AccessNonceParts {
    #[must_use]
    pub const fn new(
        aszmic: bool,
        seq: SequenceNumber,
        src: UnicastAddress,
        dst: Address,
        iv_index: IVIndex,
    ) -> Self {
        Self {
            aszmic,
            seq,
            src,
            dst,
            iv_index,
        }
    }
    fn to_nonce(&self, nonce_type: NonceType) -> Nonce {
        Nonce::build(
            nonce_type,
            u8::from(self.aszmic) << 7,
            self.seq,
            self.src,
            self.dst.value(),
            self.iv_index,
        )
    }
    #[must_use]
    pub fn to_app_nonce(&self) -> Nonce {
        self.to_nonce(NonceType::Application)
    }
    #[must_use]
    pub fn to_device_nonce(&self) -> Nonce {
        self.to_nonce(NonceType::Device)
    }
}
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ProxyNonceParts {
    pub seq: SequenceNumber,
    pub src: UnicastAddress,
    pub iv_index: IVIndex,
}
impl ProxyNonceParts {
    #[must_use]
    pub const fn new(seq: SequenceNumber, src: UnicastAddress, iv_index: IVIndex) -> Self {
        Self { seq, src, iv_index }
    }
    #[must_use]
    pub fn to_nonce(&self) -> Nonce {
        Nonce::build(NonceType::Proxy, 0, self.seq, self.src, 0, self.iv_index)
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    fn access_parts() -> AccessNonceParts {
        AccessNonceParts::new(
            false,
            SequenceNumber::new_masked(0x3129AB),
            UnicastAddress::new(0x0003),
            Address::from(0x1201),
            IVIndex(0x12345678),
        )
    }

    /// Mesh Profile v1.0 Sample Data, message #6 device nonce.
    #[test]
    fn test_device_nonce() {
        assert_eq!(
            hex::encode(access_parts().to_device_nonce()),
            "02003129ab0003120112345678"
        );
    }
    /// Mesh Profile v1.0 Sample Data, message #1 network nonce.
    #[test]
    fn test_network_nonce() {
        let parts = NetworkNonceParts::new(
            CTL(true),
            TTL::new(0),
            SequenceNumber::new_masked(1),
            UnicastAddress::new(0x1201),
            IVIndex(0x12345678),
        );
        assert_eq!(
            hex::encode(parts.to_nonce()),
            "00800000011201000012345678"
        );
        assert_eq!(parts.to_nonce().nonce_type(), Some(NonceType::Network));
    }
    #[test]
    fn test_proxy_nonce() {
        let parts = ProxyNonceParts::new(
            SequenceNumber::new_masked(1),
            UnicastAddress::new(0x0001),
            IVIndex(0x12345678),
        );
        assert_eq!(
            hex::encode(parts.to_nonce()),
            "03000000010001000012345678"
        );
    }
    #[test]
    fn test_nonce_deterministic() {
        assert_eq!(access_parts().to_app_nonce(), access_parts().to_app_nonce());
        assert_ne!(access_parts().to_app_nonce(), access_parts().to_device_nonce());
    }
    #[test]
    fn test_nonce_field_sensitivity() {
        let base = access_parts().to_app_nonce();
        let mut changed = access_parts();
        changed.seq = SequenceNumber::new_masked(0x3129AC);
        assert_ne!(changed.to_app_nonce(), base);
        let mut changed = access_parts();
        changed.src = UnicastAddress::new(0x0004);
        assert_ne!(changed.to_app_nonce(), base);
        let mut changed = access_parts();
        changed.dst = Address::from(0x1202);
        assert_ne!(changed.to_app_nonce(), base);
        let mut changed = access_parts();
        changed.iv_index = IVIndex(0x12345679);
        assert_ne!(changed.to_app_nonce(), base);
        let mut changed = access_parts();
        changed.aszmic = true;
        assert_ne!(changed.to_app_nonce(), base);
    }
}
