//! Bluetooth Mesh
//! Network Layer is BIG Endian
use crate::address::{Address, UnicastAddress};
use crate::crypto::aes::{AESCipher, Error};
use crate::crypto::key::PrivacyKey;
use crate::crypto::materials::{NetKeyMap, NetworkKeys};
use crate::crypto::nonce::NetworkNonceParts;
use crate::crypto::{MicSize, MIC};
use crate::mesh::{IVIndex, IVIndexState, NetKeyIndex, SequenceNumber, CTL, IVI, NID, TTL};
use core::convert::TryFrom;

/// Mesh Network PDU Header
/// Network layer is Big Endian.
/// From Mesh Core v1.0
/// | Field Name    | Bits  | Notes                                                     |
/// |---------------|-------|-----------------------------------------------------------|
/// | IVI           | 1     | Least significant bit of IV Index                         |
/// | NID           | 7     | Value derived from the NetKey used to encrypt this PDU    |
/// | CTL           | 1     | Network Control                                           |
/// | TTL           | 7     | Time To Live                                              |
/// | SEQ           | 24    | Sequence Number                                           |
/// | SRC           | 16    | Source Unicast Address                                    |
/// | DST           | 16    | Destination Address (Unicast, Group or Virtual            |
/// | Transport PDU | 8-128 | Transport PDU (1-16 Bytes)                                |
/// | NetMIC        | 32,64 | Message Integrity check for Payload (4 or 8 bytes)        |
///
/// NetMIC is 32 bit when CTL == 0
/// NetMIC is 64 bit when CTL == 1
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Header {
    pub ivi: IVI,
    pub nid: NID,
    pub ctl: CTL,
    pub ttl: TTL,
    pub seq: SequenceNumber,
    pub src: UnicastAddress,
    pub dst: Address,
}

const PDU_HEADER_SIZE: usize = 1 + 1 + 3 + 2 + 2;
/// IVI/NID octet plus the obfuscated CTL/TTL, SEQ and SRC.
const OBFUSCATED_START: usize = 1;
const OBFUSCATED_LEN: usize = 6;
/// Privacy Random is the first 7 bytes of the encrypted DST + Transport PDU.
const PRIVACY_RANDOM_LEN: usize = 7;
pub const MIN_ACCESS_PDU_LEN: usize = 14;
pub const MIN_CONTROL_PDU_LEN: usize = 18;
pub const MAX_TRANSPORT_PDU_LEN: usize = 16;

impl Header {
    #[must_use]
    pub const fn size(&self) -> usize {
        PDU_HEADER_SIZE
    }
    #[must_use]
    pub const fn big_mic(&self) -> bool {
        self.ctl.0
    }
    #[must_use]
    pub fn mic_size(&self) -> MicSize {
        MicSize::from(self.ctl.0)
    }
    #[must_use]
    pub const fn nonce_parts(&self, iv_index: IVIndex) -> NetworkNonceParts {
        NetworkNonceParts::new(self.ctl, self.ttl, self.seq, self.src, iv_index)
    }
    fn private_bytes(&self) -> [u8; OBFUSCATED_LEN] {
        let seq = self.seq.value().to_be_bytes();
        let src = self.src.value().to_be_bytes();
        [
            self.ttl.with_flag(self.ctl.0),
            seq[1],
            seq[2],
            seq[3],
            src[0],
            src[1],
        ]
    }
}
/// Plaintext Network PDU.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PDU {
    pub header: Header,
    pub transport_pdu: Vec<u8>,
}
impl PDU {
    #[must_use]
    pub fn len(&self) -> usize {
        PDU_HEADER_SIZE + self.transport_pdu.len() + self.header.mic_size().byte_size()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transport_pdu.is_empty()
    }
    /// Encrypts and obfuscates the PDU with `keys`. `iv_index` must match the header's IVI.
    pub fn encrypt(&self, keys: &NetworkKeys, iv_index: IVIndex) -> Result<Vec<u8>, Error> {
        if self.transport_pdu.is_empty() || self.transport_pdu.len() > MAX_TRANSPORT_PDU_LEN {
            return Err(Error);
        }
        let header = &self.header;
        let mut payload = Vec::with_capacity(2 + self.transport_pdu.len() + 8);
        payload.extend_from_slice(&header.dst.value().to_be_bytes());
        payload.extend_from_slice(&self.transport_pdu);
        let mic = AESCipher::new(keys.encryption_key().key()).ccm_encrypt(
            &header.nonce_parts(iv_index).to_nonce(),
            b"",
            &mut payload,
            header.mic_size(),
        )?;
        mic.extend_be(&mut payload);
        let mut out = Vec::with_capacity(1 + OBFUSCATED_LEN + payload.len());
        out.push(keys.nid().with_flag(header.ivi.0));
        out.extend_from_slice(&obfuscate(
            keys.privacy_key(),
            iv_index,
            header.private_bytes(),
            &payload[..PRIVACY_RANDOM_LEN],
        ));
        out.extend_from_slice(&payload);
        Ok(out)
    }
    /// Tries to decrypt `bytes` with one set of network keys. `None` on a NID mismatch, a
    /// malformed PDU or a NetMIC failure.
    #[must_use]
    pub fn decrypt(bytes: &[u8], keys: &NetworkKeys, iv_index: IVIndex) -> Option<PDU> {
        if bytes.len() < MIN_ACCESS_PDU_LEN {
            return None;
        }
        let (nid, ivi) = NID::new_with_flag(bytes[0]);
        if nid != keys.nid() {
            return None;
        }
        let payload = &bytes[OBFUSCATED_START + OBFUSCATED_LEN..];
        let mut private = [0_u8; OBFUSCATED_LEN];
        private.copy_from_slice(&bytes[OBFUSCATED_START..OBFUSCATED_START + OBFUSCATED_LEN]);
        let private = obfuscate(
            keys.privacy_key(),
            iv_index,
            private,
            &payload[..PRIVACY_RANDOM_LEN],
        );
        let (ttl, ctl) = TTL::new_with_flag(private[0]);
        if ctl && bytes.len() < MIN_CONTROL_PDU_LEN {
            return None;
        }
        let seq = SequenceNumber::new_masked(u32::from_be_bytes([
            0, private[1], private[2], private[3],
        ]));
        let src = UnicastAddress::try_from(u16::from_be_bytes([private[4], private[5]])).ok()?;
        let mic_size = MicSize::from(ctl);
        let (encrypted, mic) = payload.split_at(payload.len() - mic_size.byte_size());
        let mic = MIC::try_from_bytes_be(mic)?;
        let mut decrypted = encrypted.to_vec();
        let nonce = NetworkNonceParts::new(CTL(ctl), ttl, seq, src, iv_index).to_nonce();
        AESCipher::new(keys.encryption_key().key())
            .ccm_decrypt(&nonce, b"", &mut decrypted, mic)
            .ok()?;
        let dst = Address::from(u16::from_be_bytes([decrypted[0], decrypted[1]]));
        if !dst.is_assigned() {
            return None;
        }
        Some(PDU {
            header: Header {
                ivi: IVI(ivi),
                nid,
                ctl: CTL(ctl),
                ttl,
                seq,
                src,
                dst,
            },
            transport_pdu: decrypted[2..].to_vec(),
        })
    }
}
/// XORs the 6 private header bytes with `PECB = AES-ECB(PrivacyKey, 0^5 ‖ IV Index ‖ Privacy
/// Random)`. Obfuscating twice gives the original bytes back.
#[must_use]
pub fn obfuscate(
    privacy_key: &PrivacyKey,
    iv_index: IVIndex,
    private: [u8; OBFUSCATED_LEN],
    privacy_random: &[u8],
) -> [u8; OBFUSCATED_LEN] {
    let mut block = [0_u8; 16];
    block[5..9].copy_from_slice(&iv_index.0.to_be_bytes());
    block[9..].copy_from_slice(&privacy_random[..PRIVACY_RANDOM_LEN]);
    let pecb = AESCipher::new(privacy_key.key()).ecb_encrypt(&block);
    let mut out = private;
    for (b, p) in out.iter_mut().zip(pecb.iter()) {
        *b ^= *p;
    }
    out
}
/// A Network PDU one of the local network keys could decrypt.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct DecodedPDU {
    pub net_key_index: NetKeyIndex,
    pub iv_index: IVIndex,
    pub pdu: PDU,
}
/// Tries every network key whose NID matches (including old keys during a Key Refresh). The IV
/// Index is the current one if IVI matches its lowest bit, otherwise the previous one.
#[must_use]
pub fn decode(bytes: &[u8], net_keys: &NetKeyMap, iv_state: &IVIndexState) -> Option<DecodedPDU> {
    let first = *bytes.first()?;
    if bytes.len() < MIN_ACCESS_PDU_LEN {
        return None;
    }
    let (nid, ivi) = NID::new_with_flag(first);
    let iv_index = iv_state.rx_index(IVI(ivi))?;
    net_keys
        .matching_nid(nid)
        .find_map(|(net_key_index, materials)| {
            PDU::decrypt(bytes, materials.network_keys(), iv_index).map(|pdu| DecodedPDU {
                net_key_index,
                iv_index,
                pdu,
            })
        })
}
