//! Upper Transport Layer. Encrypts/decrypts access payloads with application or device keys
//! and picks the candidate keys for incoming PDUs.
use crate::address::{Address, LabelUUID, UnicastAddress};
use crate::control::ControlPayload;
use crate::crypto::aes::{AESCipher, Error};
use crate::crypto::key::{AppKey, DevKey, Key};
use crate::crypto::materials::SecurityMaterials;
use crate::crypto::nonce::{AccessNonceParts, Nonce};
use crate::crypto::{MicSize, AID, AKF, MIC};
use crate::lower::{
    SegN, UnsegmentedAccessPDU, UnsegmentedControlPDU, SEGMENTED_ACCESS_SEG_LEN,
    SEGMENTED_CONTROL_SEG_LEN, SZMIC,
};
use crate::mesh::{AppKeyIndex, NetKeyIndex};

/// Key used to encrypt/decrypt one access message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum KeySet {
    Application {
        net_key_index: NetKeyIndex,
        app_key_index: AppKeyIndex,
        key: AppKey,
        aid: AID,
    },
    Device {
        net_key_index: NetKeyIndex,
        key: DevKey,
    },
}
impl KeySet {
    #[must_use]
    pub const fn net_key_index(&self) -> NetKeyIndex {
        match self {
            KeySet::Application { net_key_index, .. } | KeySet::Device { net_key_index, .. } => {
                *net_key_index
            }
        }
    }
    #[must_use]
    pub const fn access_key(&self) -> Key {
        match self {
            KeySet::Application { key, .. } => key.key(),
            KeySet::Device { key, .. } => key.key(),
        }
    }
    /// `None` for device keys.
    #[must_use]
    pub const fn aid(&self) -> Option<AID> {
        match self {
            KeySet::Application { aid, .. } => Some(*aid),
            KeySet::Device { .. } => None,
        }
    }
    #[must_use]
    pub const fn akf(&self) -> AKF {
        AKF(matches!(self, KeySet::Application { .. }))
    }
    #[must_use]
    pub fn nonce(&self, parts: &AccessNonceParts) -> Nonce {
        match self {
            KeySet::Application { .. } => parts.to_app_nonce(),
            KeySet::Device { .. } => parts.to_device_nonce(),
        }
    }
    /// Encrypts `payload`. `label` is the Label UUID of a virtual destination, used as the
    /// associated data.
    pub fn encrypt(
        &self,
        parts: &AccessNonceParts,
        label: Option<&LabelUUID>,
        payload: AppPayload,
        mic_size: MicSize,
    ) -> Result<EncryptedAppPayload, Error> {
        let mut data = payload.0;
        let aad = label.map_or(&[][..], AsRef::as_ref);
        let mic = AESCipher::new(self.access_key()).ccm_encrypt(
            &self.nonce(parts),
            aad,
            &mut data,
            mic_size,
        )?;
        Ok(EncryptedAppPayload { data, mic })
    }
    pub fn decrypt(
        &self,
        parts: &AccessNonceParts,
        label: Option<&LabelUUID>,
        encrypted: &EncryptedAppPayload,
    ) -> Result<AppPayload, Error> {
        let mut data = encrypted.data.clone();
        let aad = label.map_or(&[][..], AsRef::as_ref);
        AESCipher::new(self.access_key()).ccm_decrypt(
            &self.nonce(parts),
            aad,
            &mut data,
            encrypted.mic,
        )?;
        Ok(AppPayload(data))
    }
}
/// Largest access payload (plaintext) with a 32-bit TransMIC.
pub const MAX_ACCESS_PAYLOAD_LEN: usize = 380;
/// Largest Upper Transport Access PDU (32 segments of 12 bytes).
pub const MAX_UPPER_ACCESS_LEN: usize = MAX_ACCESS_PAYLOAD_LEN + 4;
/// Access payloads up to this length fit in one unsegmented PDU with a 32-bit TransMIC.
pub const MAX_UNSEGMENTED_PAYLOAD_LEN: usize = 11;

/// Plaintext access payload (opcode + parameters).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AppPayload(Vec<u8>);
impl AppPayload {
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self(payload)
    }
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.0
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
    /// Largest payload for a TransMIC of `mic_size`.
    #[must_use]
    pub const fn max_len(mic_size: MicSize) -> usize {
        MAX_UPPER_ACCESS_LEN - mic_size.byte_size()
    }
    /// A payload segments if it doesn't fit an unsegmented PDU or wants a 64-bit TransMIC.
    #[must_use]
    pub fn should_segment(&self, mic_size: MicSize) -> bool {
        mic_size.is_big() || self.len() > MAX_UNSEGMENTED_PAYLOAD_LEN
    }
}
/// Encrypted access payload with its detached TransMIC.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EncryptedAppPayload {
    data: Vec<u8>,
    mic: MIC,
}
impl EncryptedAppPayload {
    #[must_use]
    pub fn new(data: Vec<u8>, mic: MIC) -> Self {
        Self { data, mic }
    }
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    #[must_use]
    pub const fn mic(&self) -> MIC {
        self.mic
    }
    /// Upper Transport PDU length (payload + TransMIC).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() + self.mic.byte_size()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// `payload ‖ TransMIC`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.data);
        self.mic.extend_be(&mut out);
        out
    }
    /// Splits a reassembled Upper Transport PDU. `None` if it is too short to hold a byte of
    /// payload plus the TransMIC.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], mic_size: MicSize) -> Option<Self> {
        let mic_len = mic_size.byte_size();
        if bytes.len() <= mic_len {
            return None;
        }
        let (data, mic) = bytes.split_at(bytes.len() - mic_len);
        Some(Self {
            data: data.to_vec(),
            mic: MIC::try_from_bytes_be(mic)?,
        })
    }
}
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct UpperAccessPDU {
    pub akf: AKF,
    pub aid: AID,
    pub payload: EncryptedAppPayload,
}
impl UpperAccessPDU {
    #[must_use]
    pub fn szmic(&self) -> SZMIC {
        SZMIC(self.payload.mic.is_big())
    }
}
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum UpperPDU {
    Access(UpperAccessPDU),
    Control(ControlPayload<Vec<u8>>),
}
impl UpperPDU {
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, UpperPDU::Control(_))
    }
    /// Bytes carried by the Lower Transport Layer. For control PDUs this excludes the opcode.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UpperPDU::Access(access) => access.payload.to_bytes(),
            UpperPDU::Control(control) => control.payload.clone(),
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            UpperPDU::Access(access) => access.payload.len(),
            UpperPDU::Control(control) => control.payload.len(),
        }
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    #[must_use]
    pub const fn segment_len(&self) -> usize {
        match self {
            UpperPDU::Access(_) => SEGMENTED_ACCESS_SEG_LEN,
            UpperPDU::Control(_) => SEGMENTED_CONTROL_SEG_LEN,
        }
    }
    /// Whether this PDU has to be sent as segments.
    #[must_use]
    pub fn should_segment(&self) -> bool {
        match self {
            UpperPDU::Access(access) => {
                access.payload.mic.is_big() || access.payload.len() > UnsegmentedAccessPDU::max_upper_len()
            }
            UpperPDU::Control(control) => {
                control.payload.len() > UnsegmentedControlPDU::max_parameters_size()
            }
        }
    }
    /// Last segment index when segmented. `None` if the PDU needs more than 32 segments.
    #[must_use]
    pub fn seg_n(&self) -> Option<SegN> {
        let seg_len = self.segment_len();
        let count = ((self.len() + seg_len - 1) / seg_len).max(1);
        let last = u8::try_from(count - 1).ok()?;
        if last > crate::lower::SEG_MAX {
            None
        } else {
            Some(SegN::new(last))
        }
    }
}

/// Every key the access message could be encrypted with, in the order they should be tried.
/// Application keys (`akf == 1`) are the keys bound to `net_key_index` with a matching AID.
/// Device keys are the source node's, then the destination node's, then the local one.
#[must_use]
pub fn candidate_keys(
    materials: &SecurityMaterials,
    net_key_index: NetKeyIndex,
    akf: AKF,
    aid: AID,
    src: UnicastAddress,
    dst: Address,
) -> Vec<KeySet> {
    if akf.0 {
        materials
            .app_key_map
            .matching_aid(net_key_index, aid)
            .map(|(app_key_index, key)| KeySet::Application {
                net_key_index,
                app_key_index,
                key,
                aid,
            })
            .collect()
    } else {
        let mut keys: Vec<KeySet> = Vec::with_capacity(3);
        let mut push = |key: DevKey| {
            let key_set = KeySet::Device { net_key_index, key };
            if !keys.contains(&key_set) {
                keys.push(key_set);
            }
        };
        if let Some(key) = materials.dev_key_map.node_key(src) {
            push(*key);
        }
        if let Some(key) = dst.unicast().and_then(|dst| materials.dev_key_map.node_key(dst)) {
            push(*key);
        }
        push(materials.dev_key);
        keys
    }
}
/// Decrypted access message with the key and label that opened it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenedAccess {
    pub key_set: KeySet,
    pub label: Option<LabelUUID>,
    pub payload: AppPayload,
}
/// Tries every candidate key (and, for virtual destinations, every label in `labels` whose hash
/// matches `parts.dst`). `None` once every candidate fails.
#[must_use]
pub fn open_access(
    materials: &SecurityMaterials,
    net_key_index: NetKeyIndex,
    pdu: &UpperAccessPDU,
    parts: &AccessNonceParts,
    labels: &[LabelUUID],
) -> Option<OpenedAccess> {
    let src = parts.src;
    let candidates = candidate_keys(materials, net_key_index, pdu.akf, pdu.aid, src, parts.dst);
    let matching_labels: Vec<Option<&LabelUUID>> = match parts.dst.virtual_hash() {
        Some(hash) => labels
            .iter()
            .filter(|label| crate::address::VirtualAddress::hash_uuid(label) == hash)
            .map(Some)
            .collect(),
        None => vec![None],
    };
    for key_set in candidates {
        for label in &matching_labels {
            if let Ok(payload) = key_set.decrypt(parts, *label, &pdu.payload) {
                return Some(OpenedAccess {
                    key_set,
                    label: label.copied(),
                    payload,
                });
            }
        }
    }
    None
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::VirtualAddress;
    use crate::crypto::key::Key;
    use crate::lower::{SegO, SegmentedAccessPDU, SeqZero};
    use crate::mesh::{IVIndex, SequenceNumber};

    fn sample_parts() -> AccessNonceParts {
        AccessNonceParts::new(
            false,
            SequenceNumber::new_masked(0x3129AB),
            UnicastAddress::new(0x0003),
            Address::from(0x1201),
            IVIndex(0x12345678),
        )
    }
    fn sample_dev_key() -> DevKey {
        DevKey::from_hex("9d6dd0e96eb25dc19a40ed9914f8f03f").unwrap()
    }
    /// Mesh Profile v1.0 Sample Data, message #6 upper transport PDU.
    #[test]
    fn test_device_key_sample() {
        let key_set = KeySet::Device {
            net_key_index: NetKeyIndex::new(0),
            key: sample_dev_key(),
        };
        let payload = AppPayload::new(
            hex::decode("0056341263964771734fbd76e3b40519d1d94a48").unwrap(),
        );
        let encrypted = key_set
            .encrypt(&sample_parts(), None, payload.clone(), MicSize::Small)
            .unwrap();
        assert_eq!(
            hex::encode(encrypted.to_bytes()),
            "ee9dddfd2169326d23f3afdfcfdc18c52fdef772e0e17308"
        );
        assert_eq!(
            key_set.decrypt(&sample_parts(), None, &encrypted).unwrap(),
            payload
        );
    }
    #[test]
    fn test_candidate_device_keys_order() {
        let local = DevKey::new(Key::new([1; 16]));
        let remote = DevKey::new(Key::new([2; 16]));
        let mut materials = SecurityMaterials::new(local);
        materials
            .dev_key_map
            .insert(UnicastAddress::new(0x0003), 2, remote);
        let keys = candidate_keys(
            &materials,
            NetKeyIndex::new(0),
            AKF(false),
            AID::new(0),
            UnicastAddress::new(0x0004),
            Address::from(0x0001),
        );
        assert_eq!(
            keys,
            vec![
                KeySet::Device {
                    net_key_index: NetKeyIndex::new(0),
                    key: remote
                },
                KeySet::Device {
                    net_key_index: NetKeyIndex::new(0),
                    key: local
                },
            ]
        );
    }
    #[test]
    fn test_open_with_app_key_and_virtual_label() {
        let app_key = AppKey::new(Key::new([7; 16]));
        let mut materials = SecurityMaterials::new(DevKey::new(Key::new([1; 16])));
        let net_key_index = NetKeyIndex::new(0);
        materials
            .app_key_map
            .insert(AppKeyIndex::new(3), app_key, net_key_index);
        let label = LabelUUID::new([0xAB; 16]);
        let other_label = LabelUUID::new([0xCD; 16]);
        let virtual_address = VirtualAddress::new(&label);
        let parts = AccessNonceParts::new(
            false,
            SequenceNumber::new_masked(7),
            UnicastAddress::new(0x0005),
            Address::from(virtual_address).as_wire(),
            IVIndex(0),
        );
        let key_set = KeySet::Application {
            net_key_index,
            app_key_index: AppKeyIndex::new(3),
            key: app_key,
            aid: app_key.aid(),
        };
        let encrypted = key_set
            .encrypt(&parts, Some(&label), AppPayload::new(vec![0x82, 0x01]), MicSize::Small)
            .unwrap();
        let pdu = UpperAccessPDU {
            akf: AKF(true),
            aid: app_key.aid(),
            payload: encrypted,
        };
        let opened = open_access(&materials, net_key_index, &pdu, &parts, &[other_label, label])
            .unwrap();
        assert_eq!(opened.key_set, key_set);
        assert_eq!(opened.label, Some(label));
        assert_eq!(opened.payload.payload(), &[0x82, 0x01]);
        assert!(open_access(&materials, net_key_index, &pdu, &parts, &[other_label]).is_none());
        assert!(open_access(&materials, NetKeyIndex::new(1), &pdu, &parts, &[label]).is_none());
    }
    #[test]
    fn test_segmentation_rules() {
        let pdu = |len: usize, mic: MIC| {
            UpperPDU::Access(UpperAccessPDU {
                akf: AKF(false),
                aid: AID::new(0),
                payload: EncryptedAppPayload::new(vec![0; len], mic),
            })
        };
        assert!(!pdu(11, MIC::Small(0)).should_segment());
        assert!(pdu(12, MIC::Small(0)).should_segment());
        assert!(pdu(1, MIC::Big(0)).should_segment());
        assert_eq!(pdu(20, MIC::Small(0)).seg_n(), Some(SegN::new(1)));
        assert_eq!(pdu(380, MIC::Small(0)).seg_n(), Some(SegN::new(31)));
        assert_eq!(pdu(376, MIC::Big(0)).seg_n(), Some(SegN::new(31)));
        assert_eq!(pdu(381, MIC::Small(0)).seg_n(), None);
        assert_eq!(AppPayload::max_len(MicSize::Big), 376);
    }
    /// Mesh Profile v1.0 Sample Data, message #6 segments carry the upper PDU in order.
    #[test]
    fn test_sample_segments_reassemble_upper_pdu() {
        let seg_0 = SegmentedAccessPDU::from_bytes(
            &hex::decode("8026ac01ee9dddfd2169326d23f3afdf").unwrap(),
        )
        .unwrap();
        let seg_1 = SegmentedAccessPDU::from_bytes(
            &hex::decode("8026ac21cfdc18c52fdef772e0e17308").unwrap(),
        )
        .unwrap();
        assert_eq!(seg_0.header().seq_zero, SeqZero::new(0x09AB));
        assert_eq!(seg_1.header().seg_o, SegO::new(1));
        let mut upper = seg_0.segment_data().to_vec();
        upper.extend_from_slice(seg_1.segment_data());
        let encrypted = EncryptedAppPayload::from_bytes(&upper, MicSize::Small).unwrap();
        let key_set = KeySet::Device {
            net_key_index: NetKeyIndex::new(0),
            key: sample_dev_key(),
        };
        assert_eq!(
            hex::encode(key_set.decrypt(&sample_parts(), None, &encrypted).unwrap().payload()),
            "0056341263964771734fbd76e3b40519d1d94a48"
        );
    }
}
