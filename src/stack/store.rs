//! Persisted node state. The stack only needs the next sequence number of every local element
//! to survive restarts; everything else is supplied at construction.
use crate::address::UnicastAddress;
use crate::mesh::SequenceNumber;
use std::collections::BTreeMap;

/// Storage for per element sequence numbers. `store_seq` is called before a sequence number is
/// used so a (source, IV Index, SEQ) triple is never reused after a restart.
pub trait MeshStore: Send + 'static {
    /// Next unused sequence number of `element`. `None` if nothing was stored yet.
    fn load_seq(&self, element: UnicastAddress) -> Option<SequenceNumber>;
    fn store_seq(&mut self, element: UnicastAddress, next: SequenceNumber);
}
/// Keeps everything in memory. Nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    seqs: BTreeMap<UnicastAddress, SequenceNumber>,
}
impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Starts `element` at `next` instead of 0.
    #[must_use]
    pub fn with_seq(mut self, element: UnicastAddress, next: SequenceNumber) -> Self {
        self.seqs.insert(element, next);
        self
    }
}
impl MeshStore for MemoryStore {
    fn load_seq(&self, element: UnicastAddress) -> Option<SequenceNumber> {
        self.seqs.get(&element).copied()
    }

    fn store_seq(&mut self, element: UnicastAddress, next: SequenceNumber) {
        self.seqs.insert(element, next);
    }
}
/// Hands out sequence numbers, writing the following one through the store first.
pub(crate) struct SeqAllocator {
    store: Box<dyn MeshStore>,
    /// `None` once the element ran out of sequence numbers.
    next: BTreeMap<UnicastAddress, Option<SequenceNumber>>,
}
impl SeqAllocator {
    pub(crate) fn new(store: Box<dyn MeshStore>) -> Self {
        Self {
            store,
            next: BTreeMap::new(),
        }
    }
    /// `None` once the 24-bit space of `element` is exhausted.
    pub(crate) fn allocate(&mut self, element: UnicastAddress) -> Option<SequenceNumber> {
        let store = &self.store;
        let next = *self
            .next
            .entry(element)
            .or_insert_with(|| Some(store.load_seq(element).unwrap_or_default()));
        let seq = next?;
        let following = seq.next();
        if let Some(following) = following {
            self.store.store_seq(element, following);
        }
        self.next.insert(element, following);
        Some(seq)
    }
}
