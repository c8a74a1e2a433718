//! What goes in and out of the [`Stack`](super::Stack) above the transport layers.

use crate::access::{KnownMessage, MessageHandle};
use crate::address::{Address, LabelUUID, UnicastAddress};
use crate::control::Features;
use crate::mesh::{AppKeyIndex, NetKeyIndex, TTL};
use crate::proxy::FilterType;
use crate::stack::SendError;

/// Which key encrypts an outgoing access message.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum MessageKeys {
    /// Device key of the destination node (or the local one when sending to a local element)
    /// over the given network key.
    Device(NetKeyIndex),
    App(AppKeyIndex),
}
/// Parameters of one access send besides the message itself.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct OutgoingMessage {
    /// Index into the local element addresses.
    pub source_element_index: u8,
    pub dst: Address,
    pub keys: MessageKeys,
    /// Default TTL when `None`.
    pub ttl: Option<TTL>,
    /// 64-bit TransMIC. Always segments.
    pub big_mic: bool,
}
impl OutgoingMessage {
    #[must_use]
    pub fn new(dst: Address, keys: MessageKeys) -> Self {
        Self {
            source_element_index: 0,
            dst,
            keys,
            ttl: None,
            big_mic: false,
        }
    }
    #[must_use]
    pub fn with_ttl(mut self, ttl: TTL) -> Self {
        self.ttl = Some(ttl);
        self
    }
    #[must_use]
    pub fn with_source_element(mut self, element_index: u8) -> Self {
        self.source_element_index = element_index;
        self
    }
    #[must_use]
    pub fn with_big_mic(mut self) -> Self {
        self.big_mic = true;
        self
    }
}
/// A decrypted access message addressed to this node.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub src: UnicastAddress,
    pub dst: Address,
    /// Set when `dst` is a virtual address this node knows the label of.
    pub label: Option<LabelUUID>,
    pub net_key_index: NetKeyIndex,
    /// `None` for device key messages.
    pub app_key_index: Option<AppKeyIndex>,
    pub ttl: TTL,
    /// Opcode and parameters.
    pub payload: Vec<u8>,
    pub message: KnownMessage,
    /// The acknowledged send this message answers.
    pub response_to: Option<MessageHandle>,
}
/// Everything the stack reports asynchronously.
#[derive(Clone, Debug)]
pub enum StackEvent {
    /// The message left the node. For segmented unicast messages every segment was acked.
    Delivered { handle: MessageHandle },
    SendFailed {
        handle: MessageHandle,
        error: SendError,
    },
    Received(IncomingMessage),
    /// `ConfigNodeReset` was received and acknowledged. The node should forget its keys.
    NetworkReset,
    HeartbeatReceived {
        src: UnicastAddress,
        dst: Address,
        init_ttl: u8,
        hops: u8,
        features: Features,
    },
    /// The connected proxy only keeps `max_size` addresses in its filter.
    LimitedProxyFilterDetected { max_size: u16 },
    /// The proxy acknowledged the local filter.
    ProxyFilterUpdated {
        filter_type: FilterType,
        list_size: u16,
    },
}
