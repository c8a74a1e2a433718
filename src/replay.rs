//! Replay Cache based on a BTreeMap that keeps track of the last SeqAuth per src address.
//! SeqAuth combines the IV Index and the sequence number so messages from an older IV Index are
//! always older than any message from a newer one.
use crate::address::UnicastAddress;
use crate::mesh::SeqAuth;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub struct Cache {
    map: BTreeMap<UnicastAddress, SeqAuth>,
}
impl Cache {
    #[must_use]
    pub fn new() -> Cache {
        Cache::default()
    }
    #[must_use]
    pub fn get_entry(&self, address: UnicastAddress) -> Option<SeqAuth> {
        self.map.get(&address).copied()
    }
    /// Returns `true` if `seq_auth` is old (less than or equal to the last one seen from `src`).
    #[must_use]
    pub fn is_old(&self, src: UnicastAddress, seq_auth: SeqAuth) -> bool {
        self.get_entry(src).map_or(false, |last| seq_auth <= last)
    }
    /// Returns `true` if the message is a replay and should be dropped. Otherwise records
    /// `seq_auth` as the newest value from `src` and returns `false`.
    pub fn replay_check(&mut self, src: UnicastAddress, seq_auth: SeqAuth) -> bool {
        match self.map.entry(src) {
            Entry::Vacant(v) => {
                v.insert(seq_auth);
                false
            }
            Entry::Occupied(mut o) => {
                if seq_auth <= *o.get() {
                    true
                } else {
                    o.insert(seq_auth);
                    false
                }
            }
        }
    }
    pub fn clear(&mut self) {
        self.map.clear();
    }
}
