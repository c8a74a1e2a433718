//! Proxy Filter mirrored to a connected GATT Proxy node, plus the Proxy Configuration messages
//! used to drive it.
//!
//! Local changes are applied at once and the matching Proxy Configuration message is handed
//! back to the caller to send. Only one request is in flight at a time: requests issued while
//! waiting for a Filter Status are buffered in order.
use crate::address::{Address, UnicastAddress};
use crate::crypto::aes::{AESCipher, Error};
use crate::crypto::materials::NetworkKeys;
use crate::crypto::nonce::ProxyNonceParts;
use crate::crypto::{MicSize, MIC};
use crate::mesh::{IVIndex, SequenceNumber, IVI, NID, TTL};
use crate::net;
use core::convert::TryFrom;
use std::collections::{BTreeSet, VecDeque};

#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub enum FilterType {
    #[default]
    Inclusion = 0x00,
    Exclusion = 0x01,
}
impl FilterType {
    #[must_use]
    pub const fn new(v: u8) -> Option<FilterType> {
        match v {
            0x00 => Some(FilterType::Inclusion),
            0x01 => Some(FilterType::Exclusion),
            _ => None,
        }
    }
}
/// Max addresses in one Add/Remove message.
pub const MAX_ADDRESSES_PER_MESSAGE: usize = 5;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum ProxyOpcode {
    SetFilterType = 0x00,
    AddAddressesToFilter = 0x01,
    RemoveAddressesFromFilter = 0x02,
    FilterStatus = 0x03,
}
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum ProxyConfigurationMessage {
    SetFilterType(FilterType),
    AddAddresses(Vec<Address>),
    RemoveAddresses(Vec<Address>),
    FilterStatus {
        filter_type: FilterType,
        list_size: u16,
    },
}
impl ProxyConfigurationMessage {
    #[must_use]
    pub const fn opcode(&self) -> ProxyOpcode {
        match self {
            ProxyConfigurationMessage::SetFilterType(_) => ProxyOpcode::SetFilterType,
            ProxyConfigurationMessage::AddAddresses(_) => ProxyOpcode::AddAddressesToFilter,
            ProxyConfigurationMessage::RemoveAddresses(_) => {
                ProxyOpcode::RemoveAddressesFromFilter
            }
            ProxyConfigurationMessage::FilterStatus { .. } => ProxyOpcode::FilterStatus,
        }
    }
    /// Addresses are big endian.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.opcode() as u8];
        match self {
            ProxyConfigurationMessage::SetFilterType(filter_type) => out.push(*filter_type as u8),
            ProxyConfigurationMessage::AddAddresses(addresses)
            | ProxyConfigurationMessage::RemoveAddresses(addresses) => {
                for address in addresses {
                    out.extend_from_slice(&address.value().to_be_bytes());
                }
            }
            ProxyConfigurationMessage::FilterStatus {
                filter_type,
                list_size,
            } => {
                out.push(*filter_type as u8);
                out.extend_from_slice(&list_size.to_be_bytes());
            }
        }
        out
    }
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&opcode, parameters) = bytes.split_first()?;
        let addresses = |parameters: &[u8]| -> Option<Vec<Address>> {
            if parameters.is_empty() || parameters.len() % 2 != 0 {
                return None;
            }
            Some(
                parameters
                    .chunks_exact(2)
                    .map(|b| Address::from(u16::from_be_bytes([b[0], b[1]])))
                    .collect(),
            )
        };
        match (opcode, parameters) {
            (0x00, [filter_type]) => Some(ProxyConfigurationMessage::SetFilterType(
                FilterType::new(*filter_type)?,
            )),
            (0x01, _) => Some(ProxyConfigurationMessage::AddAddresses(addresses(parameters)?)),
            (0x02, _) => Some(ProxyConfigurationMessage::RemoveAddresses(addresses(
                parameters,
            )?)),
            (0x03, [filter_type, size_hi, size_lo]) => {
                Some(ProxyConfigurationMessage::FilterStatus {
                    filter_type: FilterType::new(*filter_type)?,
                    list_size: u16::from_be_bytes([*size_hi, *size_lo]),
                })
            }
            _ => None,
        }
    }
}
/// Encrypts a Proxy Configuration message. Same layout as a control Network PDU (TTL 0,
/// unassigned DST, 64-bit NetMIC) but with the proxy nonce.
pub fn encrypt_configuration(
    message: &ProxyConfigurationMessage,
    keys: &NetworkKeys,
    iv_index: IVIndex,
    seq: SequenceNumber,
    src: UnicastAddress,
) -> Result<Vec<u8>, Error> {
    let mut payload = vec![0_u8, 0_u8];
    payload.extend_from_slice(&message.to_bytes());
    let nonce = ProxyNonceParts::new(seq, src, iv_index).to_nonce();
    let mic = AESCipher::new(keys.encryption_key().key()).ccm_encrypt(
        &nonce,
        b"",
        &mut payload,
        MicSize::Big,
    )?;
    mic.extend_be(&mut payload);
    let seq_bytes = seq.value().to_be_bytes();
    let src_bytes = src.value().to_be_bytes();
    let private = [
        TTL::new(0).with_flag(true),
        seq_bytes[1],
        seq_bytes[2],
        seq_bytes[3],
        src_bytes[0],
        src_bytes[1],
    ];
    let mut out = Vec::with_capacity(7 + payload.len());
    out.push(keys.nid().with_flag(iv_index.ivi().0));
    out.extend_from_slice(&net::obfuscate(keys.privacy_key(), iv_index, private, &payload[..7]));
    out.extend_from_slice(&payload);
    Ok(out)
}
/// Decrypts a Proxy Configuration PDU sent by the proxy. Returns the sender and the message.
#[must_use]
pub fn decrypt_configuration(
    bytes: &[u8],
    keys: &NetworkKeys,
    iv_index: IVIndex,
) -> Option<(UnicastAddress, ProxyConfigurationMessage)> {
    if bytes.len() < net::MIN_CONTROL_PDU_LEN {
        return None;
    }
    let (nid, ivi) = NID::new_with_flag(bytes[0]);
    if nid != keys.nid() || IVI(ivi) != iv_index.ivi() {
        return None;
    }
    let payload = &bytes[7..];
    let mut private = [0_u8; 6];
    private.copy_from_slice(&bytes[1..7]);
    let private = net::obfuscate(keys.privacy_key(), iv_index, private, &payload[..7]);
    let seq = SequenceNumber::new_masked(u32::from_be_bytes([0, private[1], private[2], private[3]]));
    let src = UnicastAddress::try_from(u16::from_be_bytes([private[4], private[5]])).ok()?;
    let (encrypted, mic) = payload.split_at(payload.len() - MicSize::Big.byte_size());
    let mut decrypted = encrypted.to_vec();
    AESCipher::new(keys.encryption_key().key())
        .ccm_decrypt(
            &ProxyNonceParts::new(seq, src, iv_index).to_nonce(),
            b"",
            &mut decrypted,
            MIC::try_from_bytes_be(mic)?,
        )
        .ok()?;
    if decrypted[..2] != [0, 0] {
        return None;
    }
    Some((src, ProxyConfigurationMessage::from_bytes(&decrypted[2..])?))
}

/// Reported by [`ProxyFilter::handle_status`].
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum StatusOutcome {
    /// More requests were buffered. Send this one next.
    SendNext(ProxyConfigurationMessage),
    /// The proxy confirmed the local filter.
    Acknowledged {
        filter_type: FilterType,
        list_size: u16,
    },
    /// The proxy keeps at most `max_size` addresses. The filter was reset to the local
    /// address only and `send` starts that resynchronization.
    LimitedProxyFilterDetected {
        max_size: u16,
        send: Option<ProxyConfigurationMessage>,
    },
    /// The proxy's filter differs from the local one. `send` starts re-sending the whole filter.
    Resynchronizing(Option<ProxyConfigurationMessage>),
    /// Still differs after a resynchronization. Gave up until the next change.
    LostTrack,
}
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ProxyFilter {
    filter_type: FilterType,
    addresses: BTreeSet<Address>,
    busy: bool,
    buffer: VecDeque<ProxyConfigurationMessage>,
    resync_count: u8,
    proxy: Option<UnicastAddress>,
    local_address: Option<UnicastAddress>,
}
impl ProxyFilter {
    /// `local_address` is the address kept in the filter when the proxy only supports one entry.
    #[must_use]
    pub fn new(local_address: Option<UnicastAddress>) -> Self {
        Self {
            local_address,
            ..Self::default()
        }
    }
    #[must_use]
    pub const fn filter_type(&self) -> FilterType {
        self.filter_type
    }
    #[must_use]
    pub const fn addresses(&self) -> &BTreeSet<Address> {
        &self.addresses
    }
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }
    #[must_use]
    pub const fn proxy(&self) -> Option<UnicastAddress> {
        self.proxy
    }
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
    fn send(&mut self, message: ProxyConfigurationMessage) -> Option<ProxyConfigurationMessage> {
        if self.busy {
            self.buffer.push_back(message);
            None
        } else {
            self.busy = true;
            Some(message)
        }
    }
    /// Switches the filter type. Also clears the list, on the proxy as well as locally.
    pub fn set_type(&mut self, filter_type: FilterType) -> Option<ProxyConfigurationMessage> {
        self.filter_type = filter_type;
        self.addresses.clear();
        self.send(ProxyConfigurationMessage::SetFilterType(filter_type))
    }
    /// Empty inclusion list.
    pub fn reset(&mut self) -> Option<ProxyConfigurationMessage> {
        self.set_type(FilterType::Inclusion)
    }
    /// Empties the list, keeping the type.
    pub fn clear(&mut self) -> Option<ProxyConfigurationMessage> {
        self.set_type(self.filter_type)
    }
    pub fn add(
        &mut self,
        addresses: impl IntoIterator<Item = Address>,
    ) -> Option<ProxyConfigurationMessage> {
        let new: Vec<Address> = addresses
            .into_iter()
            .filter(|a| a.is_assigned())
            .collect::<BTreeSet<Address>>()
            .into_iter()
            .map(|a| a.as_wire())
            .collect();
        self.addresses.extend(new.iter().copied());
        self.send_chunks(new, ProxyConfigurationMessage::AddAddresses)
    }
    pub fn remove(
        &mut self,
        addresses: impl IntoIterator<Item = Address>,
    ) -> Option<ProxyConfigurationMessage> {
        let removed: Vec<Address> = addresses
            .into_iter()
            .map(|a| a.as_wire())
            .filter(|a| self.addresses.remove(a))
            .collect();
        self.send_chunks(removed, ProxyConfigurationMessage::RemoveAddresses)
    }
    fn send_chunks(
        &mut self,
        addresses: Vec<Address>,
        make: fn(Vec<Address>) -> ProxyConfigurationMessage,
    ) -> Option<ProxyConfigurationMessage> {
        let mut first = None;
        for chunk in addresses.chunks(MAX_ADDRESSES_PER_MESSAGE) {
            if let Some(message) = self.send(make(chunk.to_vec())) {
                first = Some(message);
            }
        }
        first
    }
    /// The last request couldn't be sent. The filter on the proxy is unknown.
    pub fn send_failed(&mut self) {
        self.busy = false;
        self.buffer.clear();
    }
    /// The proxy connection was lost.
    pub fn proxy_did_disconnect(&mut self) {
        self.busy = false;
        self.buffer.clear();
        self.proxy = None;
        self.resync_count = 0;
    }
    /// A (new) proxy connected. Its filter starts out empty so the local filter is sent again.
    pub fn new_proxy_did_connect(&mut self) -> Option<ProxyConfigurationMessage> {
        self.proxy_did_disconnect();
        let addresses = core::mem::take(&mut self.addresses);
        let first = self.set_type(self.filter_type);
        let next = self.add(addresses);
        first.or(next)
    }
    pub fn handle_status(
        &mut self,
        from: Option<UnicastAddress>,
        filter_type: FilterType,
        list_size: u16,
    ) -> StatusOutcome {
        self.proxy = from;
        if let Some(next) = self.buffer.pop_front() {
            return StatusOutcome::SendNext(next);
        }
        self.busy = false;
        if filter_type == self.filter_type && usize::from(list_size) == self.addresses.len() {
            self.resync_count = 0;
            return StatusOutcome::Acknowledged {
                filter_type,
                list_size,
            };
        }
        if self.resync_count != 0 {
            self.resync_count = 0;
            return StatusOutcome::LostTrack;
        }
        self.resync_count += 1;
        if list_size == 1 && self.filter_type == FilterType::Inclusion {
            let first = self.reset();
            let next = self.add(self.local_address.map(Address::Unicast));
            StatusOutcome::LimitedProxyFilterDetected {
                max_size: 1,
                send: first.or(next),
            }
        } else {
            let addresses = core::mem::take(&mut self.addresses);
            let first = self.set_type(self.filter_type);
            let next = self.add(addresses);
            StatusOutcome::Resynchronizing(first.or(next))
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::NetKey;

    fn unicast(v: u16) -> Address {
        Address::from(v)
    }
    #[test]
    fn test_message_bytes() {
        let add = ProxyConfigurationMessage::AddAddresses(vec![unicast(0x0001), unicast(0xC001)]);
        assert_eq!(add.to_bytes(), vec![0x01, 0x00, 0x01, 0xC0, 0x01]);
        assert_eq!(ProxyConfigurationMessage::from_bytes(&add.to_bytes()), Some(add));
        assert_eq!(
            ProxyConfigurationMessage::from_bytes(&[0x03, 0x01, 0x00, 0x05]),
            Some(ProxyConfigurationMessage::FilterStatus {
                filter_type: FilterType::Exclusion,
                list_size: 5
            })
        );
        assert_eq!(ProxyConfigurationMessage::from_bytes(&[0x00, 0x02]), None);
        assert_eq!(ProxyConfigurationMessage::from_bytes(&[0x01, 0x00]), None);
        assert_eq!(ProxyConfigurationMessage::from_bytes(&[0x04]), None);
    }
    /// Mesh Profile v1.0 Sample Data, message #21 (Set Filter Type).
    #[test]
    fn test_encrypt_sample() {
        let keys = NetworkKeys::from(&NetKey::from_hex("d1aafb2a1a3c281cbdb0e960edfad852").unwrap());
        let message = ProxyConfigurationMessage::SetFilterType(FilterType::Inclusion);
        let encrypted = encrypt_configuration(
            &message,
            &keys,
            IVIndex(0x12345678),
            SequenceNumber::new_masked(1),
            UnicastAddress::new(0x0001),
        )
        .unwrap();
        assert_eq!(hex::encode(&encrypted), "10386bd60efbbb8b8c28512e792d3711f4b526");
        assert_eq!(
            decrypt_configuration(&encrypted, &keys, IVIndex(0x12345678)),
            Some((UnicastAddress::new(0x0001), message))
        );
    }
    #[test]
    fn test_idempotent_add_remove() {
        let mut filter = ProxyFilter::new(None);
        assert!(filter.add([unicast(1)]).is_some());
        assert!(filter.add([unicast(1)]).is_none());
        assert_eq!(filter.addresses().len(), 1);
        assert!(filter.remove([unicast(2)]).is_none());
        assert_eq!(filter.addresses().len(), 1);
        // The second add was buffered even though it changed nothing locally.
        assert_eq!(filter.buffered(), 1);
    }
    #[test]
    fn test_busy_buffers_in_order() {
        let mut filter = ProxyFilter::new(None);
        let first = filter.add((1..=7).map(unicast)).unwrap();
        assert_eq!(
            first,
            ProxyConfigurationMessage::AddAddresses((1..=5).map(unicast).collect())
        );
        assert!(filter.is_busy());
        assert!(filter.remove([unicast(1)]).is_none());
        assert_eq!(
            filter.handle_status(Some(UnicastAddress::new(0x10)), FilterType::Inclusion, 5),
            StatusOutcome::SendNext(ProxyConfigurationMessage::AddAddresses(vec![
                unicast(6),
                unicast(7)
            ]))
        );
        assert_eq!(
            filter.handle_status(Some(UnicastAddress::new(0x10)), FilterType::Inclusion, 7),
            StatusOutcome::SendNext(ProxyConfigurationMessage::RemoveAddresses(vec![unicast(1)]))
        );
        assert_eq!(
            filter.handle_status(Some(UnicastAddress::new(0x10)), FilterType::Inclusion, 6),
            StatusOutcome::Acknowledged {
                filter_type: FilterType::Inclusion,
                list_size: 6
            }
        );
        assert!(!filter.is_busy());
        assert_eq!(filter.proxy(), Some(UnicastAddress::new(0x10)));
    }
    #[test]
    fn test_limited_proxy_filter() {
        let mut filter = ProxyFilter::new(Some(UnicastAddress::new(0x0001)));
        filter.add([unicast(0x0001), unicast(0xC000)]);
        match filter.handle_status(None, FilterType::Inclusion, 1) {
            StatusOutcome::LimitedProxyFilterDetected { max_size, send } => {
                assert_eq!(max_size, 1);
                assert_eq!(
                    send,
                    Some(ProxyConfigurationMessage::SetFilterType(FilterType::Inclusion))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(filter.addresses().len(), 1);
    }
    #[test]
    fn test_resync_once() {
        let mut filter = ProxyFilter::new(None);
        filter.add([unicast(1), unicast(2), unicast(3)]);
        assert!(matches!(
            filter.handle_status(None, FilterType::Inclusion, 2),
            StatusOutcome::Resynchronizing(Some(_))
        ));
        assert_eq!(
            filter.handle_status(None, FilterType::Inclusion, 0),
            StatusOutcome::SendNext(ProxyConfigurationMessage::AddAddresses(vec![
                unicast(1),
                unicast(2),
                unicast(3)
            ]))
        );
        assert_eq!(
            filter.handle_status(None, FilterType::Inclusion, 2),
            StatusOutcome::LostTrack
        );
    }
    #[test]
    fn test_disconnect_and_reconnect() {
        let mut filter = ProxyFilter::new(None);
        filter.set_type(FilterType::Exclusion);
        filter.add([unicast(4)]);
        filter.handle_status(Some(UnicastAddress::new(9)), FilterType::Exclusion, 0);
        filter.proxy_did_disconnect();
        assert!(!filter.is_busy());
        assert_eq!(filter.buffered(), 0);
        assert_eq!(filter.proxy(), None);
        assert_eq!(
            filter.new_proxy_did_connect(),
            Some(ProxyConfigurationMessage::SetFilterType(FilterType::Exclusion))
        );
        assert_eq!(filter.buffered(), 1);
        assert_eq!(filter.addresses().len(), 1);
    }
}
