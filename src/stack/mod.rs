//! Bluetooth Mesh Stack that connects all the layers together.
//!
//! Layers:
//! - Access
//! - Upper Transport
//! - Lower Transport
//! - Network
//! - Bearer (the [`Transmitter`] plus [`Stack::handle_incoming`])
//!
//! All mutable state lives in one session behind a tokio `Mutex`. Incoming PDUs, sends and the
//! timer tasks (retransmission, acks, reassembly discard, response timeouts) each lock it before
//! touching anything, so sequence number allocation and reassembly are serialized. Results that
//! arrive later are reported as [`StackEvent`]s on the channel returned by [`Stack::new`].

mod incoming;
pub mod messages;
mod outgoing;
mod segments;
pub mod store;
#[cfg(test)]
mod tests;

use crate::access::{MessageId, MessageRegistry, PendingResponses};
use crate::address::{Address, LabelUUID, UnicastAddress, VirtualAddress};
use crate::bearer::{BearerError, PDUType, Transmitter};
use crate::config::NetworkParameters;
use crate::control::ControlMessageError;
use crate::crypto::materials::SecurityMaterials;
use crate::mesh::{IVIndexState, NetKeyIndex, SequenceNumber};
use crate::models::MessagePackError;
use crate::proxy::ProxyFilter;
use crate::reassembler::ReassembleError;
use crate::replay;
use futures_util::future::AbortHandle;
use slog::{o, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub use messages::{IncomingMessage, MessageKeys, OutgoingMessage, StackEvent};
pub use store::{MemoryStore, MeshStore};

/// Returned (or reported with [`StackEvent::SendFailed`]) when an outgoing message can't be
/// sent.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, thiserror::Error)]
pub enum SendError {
    #[error("bearer error: {0}")]
    Bearer(#[from] BearerError),
    #[error("receiver is busy")]
    Busy,
    #[error("segments weren't acknowledged")]
    SegmentAckTimeout,
    #[error("no response before the timeout")]
    ResponseTimeout,
    #[error("an identical request to this destination is still awaiting its response")]
    AwaitingResponse,
    #[error("sequence numbers exhausted")]
    OutOfSeq,
    #[error("invalid destination address")]
    InvalidDestination,
    #[error("invalid source element")]
    InvalidSourceElement,
    #[error("unknown network key")]
    NoNetKey,
    #[error("unknown application key")]
    NoAppKey,
    #[error("message too long")]
    MessageTooLong,
    #[error("encryption failed")]
    Encryption,
    #[error("message pack error: {0}")]
    Pack(#[from] MessagePackError),
}
/// Returned by [`Stack::handle_incoming`] for PDUs that can't be processed. PDUs that fail
/// authentication (NetMIC or TransMIC) or aren't addressed to this node are dropped without an
/// error.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, thiserror::Error)]
pub enum RecvError {
    #[error("bearer delivered a {0:?} PDU")]
    UnsupportedPDUType(PDUType),
    #[error("malformed network PDU")]
    MalformedNetworkPDU,
    #[error("malformed lower transport PDU")]
    MalformedLowerPDU,
    #[error("malformed control message: {0}")]
    MalformedControl(#[from] ControlMessageError),
    #[error("malformed access message: {0}")]
    MalformedAccess(#[from] MessagePackError),
    #[error("replayed or old sequence number")]
    Replay,
    #[error("reassembly failed: {0}")]
    Reassembly(#[from] ReassembleError),
}
/// Node identity and tuning the [`Stack`] starts with. Keys come separately as
/// [`SecurityMaterials`].
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackConfig {
    pub primary_address: UnicastAddress,
    pub element_count: u8,
    pub iv_index: IVIndexState,
    pub parameters: NetworkParameters,
    /// Network key used for Proxy Configuration messages.
    pub primary_net_key_index: NetKeyIndex,
    /// Group and virtual addresses local models subscribe to.
    pub subscriptions: Vec<Address>,
    /// Label UUIDs of the virtual addresses this node sends to or listens on.
    pub labels: Vec<LabelUUID>,
}
impl StackConfig {
    #[must_use]
    pub fn new(primary_address: UnicastAddress, element_count: u8, iv_index: IVIndexState) -> Self {
        Self {
            primary_address,
            element_count,
            iv_index,
            parameters: NetworkParameters::default(),
            primary_net_key_index: NetKeyIndex::new(0),
            subscriptions: Vec::new(),
            labels: Vec::new(),
        }
    }
    #[must_use]
    pub fn with_parameters(mut self, parameters: NetworkParameters) -> Self {
        self.parameters = parameters;
        self
    }
    #[must_use]
    pub fn element_address(&self, element_index: u8) -> Option<UnicastAddress> {
        if element_index < self.element_count {
            self.primary_address.offset(u16::from(element_index))
        } else {
            None
        }
    }
    #[must_use]
    pub fn element_index(&self, address: UnicastAddress) -> Option<u8> {
        let offset = address.value().checked_sub(self.primary_address.value())?;
        u8::try_from(offset)
            .ok()
            .filter(|offset| *offset < self.element_count)
    }
    #[must_use]
    pub fn is_local_element(&self, address: UnicastAddress) -> bool {
        self.element_index(address).is_some()
    }
    /// Group or virtual `dst` a local model listens on. The all-nodes address always is.
    #[must_use]
    pub fn is_subscribed(&self, dst: &Address) -> bool {
        match dst {
            Address::Group(group) => {
                group.value() == 0xFFFF
                    || self
                        .subscriptions
                        .iter()
                        .any(|s| s.group() == Some(*group))
            }
            Address::Virtual(_) | Address::VirtualHash(_) => {
                let hash = dst.virtual_hash();
                self.labels
                    .iter()
                    .any(|label| Some(VirtualAddress::hash_uuid(label)) == hash)
            }
            Address::Unassigned | Address::Unicast(_) => false,
        }
    }
    /// Should a PDU sent to `dst` be processed by this node.
    #[must_use]
    pub fn is_for_us(&self, dst: &Address) -> bool {
        match dst.unicast() {
            Some(unicast) => self.is_local_element(unicast),
            None => self.is_subscribed(dst),
        }
    }
}
/// Everything behind the session lock.
pub(crate) struct Session {
    pub(crate) config: StackConfig,
    pub(crate) materials: SecurityMaterials,
    pub(crate) seqs: store::SeqAllocator,
    pub(crate) registry: MessageRegistry,
    pub(crate) replay: replay::Cache,
    pub(crate) reassembly: segments::Reassembly,
    pub(crate) outgoing: segments::Outgoing,
    pub(crate) pending: PendingResponses,
    pub(crate) response_timers: BTreeMap<MessageId, AbortHandle>,
    pub(crate) proxy_filter: ProxyFilter,
    next_message_id: u64,
}
impl Session {
    pub(crate) fn next_message_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        id
    }
    pub(crate) fn allocate_seq(&mut self, element: UnicastAddress) -> Result<SequenceNumber, SendError> {
        self.seqs.allocate(element).ok_or(SendError::OutOfSeq)
    }
    /// Stops waiting for the response to `id`. `true` if it was still pending.
    pub(crate) fn cancel_response(&mut self, id: MessageId) -> bool {
        if let Some(timer) = self.response_timers.remove(&id) {
            timer.abort();
        }
        self.pending.remove(id).is_some()
    }
}
pub(crate) struct Shared<T: Transmitter> {
    pub(crate) session: Mutex<Session>,
    pub(crate) transmitter: T,
    pub(crate) logger: Logger,
    events: mpsc::UnboundedSender<StackEvent>,
}
impl<T: Transmitter> Shared<T> {
    pub(crate) fn emit(&self, event: StackEvent) {
        if self.events.send(event).is_err() {
            slog::trace!(self.logger, "event receiver dropped");
        }
    }
}
/// Bluetooth Mesh node. Cheap to clone; every clone drives the same session.
pub struct Stack<T: Transmitter> {
    shared: Arc<Shared<T>>,
}
impl<T: Transmitter> Clone for Stack<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
impl<T: Transmitter> Stack<T> {
    /// Builds the stack. Events are delivered on the returned receiver for as long as it lives.
    pub fn new(
        transmitter: T,
        config: StackConfig,
        materials: SecurityMaterials,
        store: impl MeshStore,
        parent_logger: &Logger,
    ) -> (Self, mpsc::UnboundedReceiver<StackEvent>) {
        let logger = parent_logger.new(o!("node" => config.primary_address.value()));
        let (tx, rx) = mpsc::unbounded_channel();
        let proxy_filter = ProxyFilter::new(Some(config.primary_address));
        let session = Session {
            config,
            materials,
            seqs: store::SeqAllocator::new(Box::new(store)),
            registry: MessageRegistry::new(),
            replay: replay::Cache::new(),
            reassembly: segments::Reassembly::default(),
            outgoing: segments::Outgoing::default(),
            pending: PendingResponses::new(),
            response_timers: BTreeMap::new(),
            proxy_filter,
            next_message_id: 0,
        };
        (
            Self {
                shared: Arc::new(Shared {
                    session: Mutex::new(session),
                    transmitter,
                    logger,
                    events: tx,
                }),
            },
            rx,
        )
    }
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.shared.logger
    }
    #[must_use]
    pub fn transmitter(&self) -> &T {
        &self.shared.transmitter
    }
    pub async fn config(&self) -> StackConfig {
        self.shared.session.lock().await.config.clone()
    }
    pub async fn set_iv_index(&self, iv_index: IVIndexState) {
        self.shared.session.lock().await.config.iv_index = iv_index;
    }
    /// Starts listening on a group or virtual address. Virtual addresses also teach the stack
    /// their label.
    pub async fn subscribe(&self, address: Address) {
        let mut session = self.shared.session.lock().await;
        if let Some(label) = address.label_uuid() {
            if !session.config.labels.contains(label) {
                session.config.labels.push(*label);
            }
        }
        if !session.config.subscriptions.contains(&address) {
            session.config.subscriptions.push(address);
        }
    }
    pub async fn unsubscribe(&self, address: Address) {
        self.shared
            .session
            .lock()
            .await
            .config
            .subscriptions
            .retain(|a| *a != address);
    }
    /// Runs `f` with the keys. Key changes apply to the next PDU in or out.
    pub async fn security_materials_with_mut<R>(
        &self,
        f: impl FnOnce(&mut SecurityMaterials) -> R,
    ) -> R {
        f(&mut self.shared.session.lock().await.materials)
    }
    /// Runs `f` with the opcode registry, for example to [`MessageRegistry::register`] vendor
    /// messages.
    pub async fn registry_with_mut<R>(&self, f: impl FnOnce(&mut MessageRegistry) -> R) -> R {
        f(&mut self.shared.session.lock().await.registry)
    }
    /// Forgets every in-flight message, reassembly and the replay cache. Pending sends are
    /// dropped without events. Used after a [`StackEvent::NetworkReset`].
    pub async fn reset(&self) {
        let mut session = self.shared.session.lock().await;
        session.outgoing.clear();
        session.reassembly.clear();
        session.replay.clear();
        for timer in core::mem::take(&mut session.response_timers).into_values() {
            timer.abort();
        }
        session.pending = PendingResponses::new();
        slog::info!(self.shared.logger, "stack reset");
    }
}
