//! Bookkeeping for segmented messages in both directions. The timers themselves are tokio tasks
//! owned by the stack; only their abort handles live here.
use crate::access::{MessageHandle, MessageId};
use crate::address::{Address, UnicastAddress};
use crate::control::Ack;
use crate::lower::SeqZero;
use crate::mesh::{NetKeyIndex, SeqAuth, TTL};
use crate::reassembler::Context;
use crate::segmenter::{OutgoingTransaction, Segmenter};
use crate::stack::outgoing::SendRequest;
use crate::upper::AppPayload;
use futures_util::future::AbortHandle;
use std::collections::{BTreeMap, VecDeque};
use tokio::time::Instant;

pub(crate) type ReassemblyKey = (UnicastAddress, SeqZero);

/// A segmented message being reassembled.
pub(crate) struct IncomingSegments {
    pub(crate) context: Context,
    pub(crate) seq_auth: SeqAuth,
    pub(crate) dst: Address,
    pub(crate) net_key_index: NetKeyIndex,
    /// TTL acks for this message are sent with.
    pub(crate) ack_ttl: TTL,
    pub(crate) discard_timer: AbortHandle,
    pub(crate) ack_timer: Option<AbortHandle>,
}
impl IncomingSegments {
    pub(crate) fn abort_timers(&self) {
        self.discard_timer.abort();
        if let Some(ack_timer) = &self.ack_timer {
            ack_timer.abort();
        }
    }
}
/// Ack of the last message completed from a source. Re-sent when its segments show up again.
pub(crate) struct CompletedAck {
    pub(crate) seq_auth: SeqAuth,
    pub(crate) ack: Ack,
    /// Local element the message was addressed to.
    pub(crate) element: UnicastAddress,
    pub(crate) net_key_index: NetKeyIndex,
    pub(crate) ttl: TTL,
    pub(crate) last_sent: Instant,
}
#[derive(Default)]
pub(crate) struct Reassembly {
    incoming: BTreeMap<ReassemblyKey, IncomingSegments>,
    completed: BTreeMap<UnicastAddress, CompletedAck>,
}
impl Reassembly {
    pub(crate) fn get(&self, key: &ReassemblyKey) -> Option<&IncomingSegments> {
        self.incoming.get(key)
    }
    pub(crate) fn get_mut(&mut self, key: &ReassemblyKey) -> Option<&mut IncomingSegments> {
        self.incoming.get_mut(key)
    }
    pub(crate) fn insert(&mut self, key: ReassemblyKey, segments: IncomingSegments) {
        if let Some(old) = self.incoming.insert(key, segments) {
            old.abort_timers();
        }
    }
    pub(crate) fn remove(&mut self, key: &ReassemblyKey) -> Option<IncomingSegments> {
        let segments = self.incoming.remove(key)?;
        segments.abort_timers();
        Some(segments)
    }
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.incoming.len()
    }
    pub(crate) fn completed_mut(
        &mut self,
        src: UnicastAddress,
        seq_auth: SeqAuth,
    ) -> Option<&mut CompletedAck> {
        self.completed
            .get_mut(&src)
            .filter(|completed| completed.seq_auth == seq_auth)
    }
    pub(crate) fn record_completed(&mut self, src: UnicastAddress, completed: CompletedAck) {
        self.completed.insert(src, completed);
    }
    pub(crate) fn clear(&mut self) {
        for segments in self.incoming.values() {
            segments.abort_timers();
        }
        self.incoming.clear();
        self.completed.clear();
    }
}
/// A segmented message waiting for its turn to the same destination. Still unencrypted.
pub(crate) struct QueuedSegments {
    pub(crate) handle: MessageHandle,
    pub(crate) request: SendRequest,
    pub(crate) payload: AppPayload,
}
/// A segmented message on the air.
pub(crate) struct OutgoingSegments {
    pub(crate) handle: MessageHandle,
    pub(crate) segmenter: Segmenter,
    pub(crate) transaction: OutgoingTransaction,
    pub(crate) net_key_index: NetKeyIndex,
    pub(crate) ttl: TTL,
    pub(crate) driver: AbortHandle,
}
/// At most one segmented message in flight per (source, destination). Later ones wait in FIFO
/// order.
#[derive(Default)]
pub(crate) struct Outgoing {
    in_flight: BTreeMap<MessageId, OutgoingSegments>,
    queued: VecDeque<QueuedSegments>,
}
impl Outgoing {
    pub(crate) fn is_busy(&self, src: UnicastAddress, dst: Address) -> bool {
        self.in_flight
            .values()
            .any(|o| o.handle.src == src && o.handle.dst == dst)
    }
    pub(crate) fn enqueue(&mut self, queued: QueuedSegments) {
        self.queued.push_back(queued);
    }
    /// Oldest message queued from `src` to `dst`.
    pub(crate) fn take_next(
        &mut self,
        src: UnicastAddress,
        dst: Address,
    ) -> Option<QueuedSegments> {
        let position = self
            .queued
            .iter()
            .position(|q| q.handle.src == src && q.handle.dst == dst)?;
        self.queued.remove(position)
    }
    pub(crate) fn insert(&mut self, segments: OutgoingSegments) {
        self.in_flight.insert(segments.handle.id, segments);
    }
    pub(crate) fn get(&self, id: MessageId) -> Option<&OutgoingSegments> {
        self.in_flight.get(&id)
    }
    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut OutgoingSegments> {
        self.in_flight.get_mut(&id)
    }
    pub(crate) fn remove(&mut self, id: MessageId) -> Option<OutgoingSegments> {
        let segments = self.in_flight.remove(&id)?;
        segments.driver.abort();
        Some(segments)
    }
    pub(crate) fn remove_queued(&mut self, id: MessageId) -> Option<QueuedSegments> {
        let position = self.queued.iter().position(|q| q.handle.id == id)?;
        self.queued.remove(position)
    }
    /// The in-flight message from local element `element` an ack for `seq_zero` refers to.
    pub(crate) fn find_acked(
        &self,
        element: UnicastAddress,
        seq_zero: SeqZero,
    ) -> Option<MessageId> {
        self.in_flight
            .values()
            .find(|o| o.handle.src == element && o.transaction.seq_zero() == seq_zero)
            .map(|o| o.handle.id)
    }
    pub(crate) fn clear(&mut self) {
        for segments in self.in_flight.values() {
            segments.driver.abort();
        }
        self.in_flight.clear();
        self.queued.clear();
    }
}
