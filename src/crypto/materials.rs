//! Collection of security materials (Keys, NID, AID, etc) used for encryption and decryption.
use crate::address::UnicastAddress;
use crate::crypto::key::{AppKey, DevKey, EncryptionKey, NetKey, PrivacyKey};
use crate::crypto::{k2, KeyRefreshPhases, AID};
use crate::mesh::{AppKeyIndex, NetKeyIndex, NID};
use std::collections::btree_map;

#[derive(Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Hash, Debug)]
pub struct NetworkKeys {
    nid: NID,
    encryption: EncryptionKey,
    privacy: PrivacyKey,
}

impl NetworkKeys {
    #[must_use]
    pub const fn new(nid: NID, encryption: EncryptionKey, privacy: PrivacyKey) -> Self {
        Self {
            nid,
            encryption,
            privacy,
        }
    }
    #[must_use]
    pub const fn nid(&self) -> NID {
        self.nid
    }
    #[must_use]
    pub const fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption
    }
    #[must_use]
    pub const fn privacy_key(&self) -> &PrivacyKey {
        &self.privacy
    }
}
impl From<&NetKey> for NetworkKeys {
    fn from(k: &NetKey) -> Self {
        let (nid, encryption, privacy) = k2(k.key(), b"\x00");
        Self::new(nid, encryption, privacy)
    }
}
#[derive(Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Hash, Debug)]
pub struct NetworkSecurityMaterials {
    net_key: NetKey,
    network_keys: NetworkKeys,
}
impl NetworkSecurityMaterials {
    #[must_use]
    pub const fn net_key(&self) -> &NetKey {
        &self.net_key
    }
    #[must_use]
    pub const fn network_keys(&self) -> &NetworkKeys {
        &self.network_keys
    }
}
impl From<&NetKey> for NetworkSecurityMaterials {
    fn from(k: &NetKey) -> Self {
        Self {
            net_key: *k,
            network_keys: k.into(),
        }
    }
}
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct KeyPair<K: Clone + Copy + Eq + PartialEq> {
    pub new: K,
    pub old: K,
}
/// Key Refresh Procedure phase of a key. Phase 1 transmits with the old key, Phase 2 with the new
/// one. Both keys are accepted while refreshing.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum KeyPhase<K: Clone + Copy + Eq + PartialEq> {
    Normal(K),
    Phase1(KeyPair<K>),
    Phase2(KeyPair<K>),
}
impl<K: Clone + Copy + Eq> KeyPhase<K> {
    #[must_use]
    pub const fn phase(&self) -> KeyRefreshPhases {
        match self {
            KeyPhase::Normal(_) => KeyRefreshPhases::Normal,
            KeyPhase::Phase1(_) => KeyRefreshPhases::First,
            KeyPhase::Phase2(_) => KeyRefreshPhases::Second,
        }
    }
    #[must_use]
    pub const fn tx_key(&self) -> &K {
        match self {
            KeyPhase::Normal(k) => k,
            KeyPhase::Phase1(p) => &p.old,
            KeyPhase::Phase2(p) => &p.new,
        }
    }
    #[must_use]
    pub const fn rx_keys(&self) -> (&K, Option<&K>) {
        match self {
            KeyPhase::Normal(k) => (k, None),
            KeyPhase::Phase1(p) => (&p.old, Some(&p.new)),
            KeyPhase::Phase2(p) => (&p.new, Some(&p.old)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NetKeyMap {
    map: btree_map::BTreeMap<NetKeyIndex, KeyPhase<NetworkSecurityMaterials>>,
}
impl NetKeyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, index: NetKeyIndex, net_key: &NetKey) {
        self.map.insert(index, KeyPhase::Normal(net_key.into()));
    }
    /// Starts the Key Refresh Procedure (Phase 1) for `index` with `new_key`.
    /// Returns `false` if `index` is unknown.
    pub fn start_refresh(&mut self, index: NetKeyIndex, new_key: &NetKey) -> bool {
        match self.map.get_mut(&index) {
            Some(phase) => {
                *phase = KeyPhase::Phase1(KeyPair {
                    old: *phase.tx_key(),
                    new: new_key.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Returns all `NetworkSecurityMaterials` matching `nid_to_match`. Because `NID` is a 7-bit value,
    /// one `NID` can match multiple different networks. For this reason, this functions returns an
    /// iterator that yields each matching network security materials. Only attempting to decrypt
    /// the Network PDU (and it failing/succeeding) will tell you if the `NID` and `NetworkKeys` match.
    pub fn matching_nid(
        &self,
        nid_to_match: NID,
    ) -> impl Iterator<Item = (NetKeyIndex, &'_ NetworkSecurityMaterials)> {
        self.map.iter().flat_map(move |(&index, phase)| {
            let (first, second) = phase.rx_keys();
            core::iter::once(first)
                .chain(second)
                .filter(move |sm| sm.network_keys.nid == nid_to_match)
                .map(move |sm| (index, sm))
        })
    }
    #[must_use]
    pub fn get_keys(&self, index: NetKeyIndex) -> Option<&KeyPhase<NetworkSecurityMaterials>> {
        self.map.get(&index)
    }
    pub fn get_keys_mut(
        &mut self,
        index: NetKeyIndex,
    ) -> Option<&mut KeyPhase<NetworkSecurityMaterials>> {
        self.map.get_mut(&index)
    }
    pub fn remove_keys(
        &mut self,
        index: NetKeyIndex,
    ) -> Option<KeyPhase<NetworkSecurityMaterials>> {
        self.map.remove(&index)
    }
}
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApplicationSecurityMaterials {
    pub app_key: AppKey,
    pub aid: AID,
    pub net_key_index: NetKeyIndex,
    /// Previous key (and its AID) kept while the key is being refreshed.
    pub old: Option<(AppKey, AID)>,
}
impl ApplicationSecurityMaterials {
    #[must_use]
    pub fn new(app_key: AppKey, net_key_index: NetKeyIndex) -> Self {
        Self {
            app_key,
            aid: app_key.aid(),
            net_key_index,
            old: None,
        }
    }
}
#[derive(Clone, Debug, Default)]
pub struct AppKeyMap {
    map: btree_map::BTreeMap<AppKeyIndex, ApplicationSecurityMaterials>,
}
impl AppKeyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, index: AppKeyIndex, app_key: AppKey, net_key_index: NetKeyIndex) {
        self.map.insert(
            index,
            ApplicationSecurityMaterials::new(app_key, net_key_index),
        );
    }
    /// Replaces the key at `index`, keeping the previous key as the old key.
    pub fn refresh(&mut self, index: AppKeyIndex, new_key: AppKey) -> bool {
        match self.map.get_mut(&index) {
            Some(sm) => {
                let old = (sm.app_key, sm.aid);
                *sm = ApplicationSecurityMaterials {
                    old: Some(old),
                    ..ApplicationSecurityMaterials::new(new_key, sm.net_key_index)
                };
                true
            }
            None => false,
        }
    }
    #[must_use]
    pub fn get_key(&self, index: AppKeyIndex) -> Option<&ApplicationSecurityMaterials> {
        self.map.get(&index)
    }
    pub fn remove_key(&mut self, index: AppKeyIndex) -> Option<ApplicationSecurityMaterials> {
        self.map.remove(&index)
    }
    /// Every application key (current and old) bound to `net_key_index` whose AID equals `aid`.
    pub fn matching_aid(
        &self,
        net_key_index: NetKeyIndex,
        aid: AID,
    ) -> impl Iterator<Item = (AppKeyIndex, AppKey)> + '_ {
        self.map
            .iter()
            .filter(move |(_, sm)| sm.net_key_index == net_key_index)
            .flat_map(move |(&index, sm)| {
                core::iter::once((sm.app_key, sm.aid))
                    .chain(sm.old)
                    .filter(move |(_, key_aid)| *key_aid == aid)
                    .map(move |(key, _)| (index, key))
            })
    }
}
/// Device Keys of remote nodes, keyed by primary element address.
#[derive(Clone, Debug, Default)]
pub struct DevKeyMap {
    map: btree_map::BTreeMap<UnicastAddress, (u16, DevKey)>,
}
impl DevKeyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, primary: UnicastAddress, element_count: u16, dev_key: DevKey) {
        self.map.insert(primary, (element_count, dev_key));
    }
    /// Finds the Device Key of the node owning element `address`.
    #[must_use]
    pub fn node_key(&self, address: UnicastAddress) -> Option<&DevKey> {
        let (primary, (count, key)) = self.map.range(..=address).next_back()?;
        if address.value() - primary.value() < *count {
            Some(key)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct SecurityMaterials {
    pub dev_key: DevKey,
    pub net_key_map: NetKeyMap,
    pub app_key_map: AppKeyMap,
    pub dev_key_map: DevKeyMap,
}
impl SecurityMaterials {
    #[must_use]
    pub fn new(dev_key: DevKey) -> Self {
        Self {
            dev_key,
            net_key_map: NetKeyMap::new(),
            app_key_map: AppKeyMap::new(),
            dev_key_map: DevKeyMap::new(),
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_nid_includes_old_key() {
        let old = NetKey::from_hex("7dd7364cd842ad18c17c2b820c84c3d6").unwrap();
        let new = NetKey::from_hex("f7a2a44f8e8a8029064f173ddc1e2b00").unwrap();
        let mut map = NetKeyMap::new();
        let index = NetKeyIndex::new(0);
        map.insert(index, &old);
        assert!(map.start_refresh(index, &new));
        let old_nid = NetworkKeys::from(&old).nid();
        let new_nid = NetworkKeys::from(&new).nid();
        assert_eq!(new_nid, NID::new(0x7F));
        assert_eq!(map.matching_nid(old_nid).count(), 1);
        assert_eq!(map.matching_nid(new_nid).count(), 1);
        assert_eq!(
            map.get_keys(index).unwrap().tx_key().net_key(),
            &old,
            "phase 1 keeps transmitting with the old key"
        );
    }
    #[test]
    fn test_matching_aid() {
        let key = AppKey::from_hex("3216d1509884b533248541792b877f98").unwrap();
        let mut map = AppKeyMap::new();
        map.insert(AppKeyIndex::new(1), key, NetKeyIndex::new(0));
        assert_eq!(
            map.matching_aid(NetKeyIndex::new(0), AID::new(0x38))
                .collect::<Vec<_>>(),
            vec![(AppKeyIndex::new(1), key)]
        );
        assert_eq!(
            map.matching_aid(NetKeyIndex::new(1), AID::new(0x38))
                .count(),
            0
        );
    }
    #[test]
    fn test_dev_key_map_ranges() {
        let key = DevKey::from_hex("9d6dd0e96eb25dc19a40ed9914f8f03f").unwrap();
        let mut map = DevKeyMap::new();
        map.insert(UnicastAddress::new(0x0003), 2, key);
        assert_eq!(map.node_key(UnicastAddress::new(0x0003)), Some(&key));
        assert_eq!(map.node_key(UnicastAddress::new(0x0004)), Some(&key));
        assert_eq!(map.node_key(UnicastAddress::new(0x0005)), None);
        assert_eq!(map.node_key(UnicastAddress::new(0x0002)), None);
    }
}
