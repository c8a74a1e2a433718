//! Outgoing PDU handler. Encrypts access messages, segments them, drives the retransmission of
//! unacknowledged segments and waits for responses.
use crate::access::{MessageHandle, MessageId, Opcode};
use crate::address::{Address, UnicastAddress};
use crate::bearer::{PDUType, Transmitter};
use crate::control::{Ack, ControlMessage};
use crate::crypto::nonce::AccessNonceParts;
use crate::crypto::{MicSize, AID};
use crate::lower::{self, SeqZero};
use crate::mesh::{NetKeyIndex, SequenceNumber, TTL};
use crate::models::{MessagePackError, PackableMessage};
use crate::net;
use crate::proxy::{self, FilterType, ProxyConfigurationMessage, ProxyFilter};
use crate::segmenter::{AckOutcome, OutgoingTransaction, Segmenter, TimerOutcome};
use crate::stack::messages::{MessageKeys, OutgoingMessage, StackEvent};
use crate::stack::segments::{OutgoingSegments, QueuedSegments};
use crate::stack::{SendError, Session, Shared, Stack};
use crate::upper::{AppPayload, KeySet, UpperAccessPDU, UpperPDU};
use futures_util::future::{AbortHandle, Abortable};
use slog::{debug, info, warn};
use std::sync::Arc;

/// Fully resolved send parameters.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SendRequest {
    pub(crate) src: UnicastAddress,
    pub(crate) dst: Address,
    pub(crate) key_set: KeySet,
    pub(crate) ttl: TTL,
    pub(crate) mic_size: MicSize,
    pub(crate) response_opcode: Option<Opcode>,
}
/// Upper Transport PDU encrypted with the sequence number of its first segment.
struct EncryptedMessage {
    segmenter: Segmenter,
    net_key_index: NetKeyIndex,
    ttl: TTL,
    first_seq: SequenceNumber,
}
impl Session {
    pub(crate) fn resolve(
        &self,
        outgoing: &OutgoingMessage,
        response_opcode: Option<Opcode>,
    ) -> Result<SendRequest, SendError> {
        let src = self
            .config
            .element_address(outgoing.source_element_index)
            .ok_or(SendError::InvalidSourceElement)?;
        let dst = outgoing.dst;
        // Virtual destinations need the full Label UUID.
        if matches!(dst, Address::Unassigned | Address::VirtualHash(_)) {
            return Err(SendError::InvalidDestination);
        }
        let key_set = match outgoing.keys {
            MessageKeys::App(app_key_index) => {
                let sm = self
                    .materials
                    .app_key_map
                    .get_key(app_key_index)
                    .ok_or(SendError::NoAppKey)?;
                KeySet::Application {
                    net_key_index: sm.net_key_index,
                    app_key_index,
                    key: sm.app_key,
                    aid: sm.aid,
                }
            }
            MessageKeys::Device(net_key_index) => {
                let dst = dst.unicast().ok_or(SendError::InvalidDestination)?;
                let key = self
                    .materials
                    .dev_key_map
                    .node_key(dst)
                    .copied()
                    .unwrap_or(self.materials.dev_key);
                KeySet::Device { net_key_index, key }
            }
        };
        if self
            .materials
            .net_key_map
            .get_keys(key_set.net_key_index())
            .is_none()
        {
            return Err(SendError::NoNetKey);
        }
        Ok(SendRequest {
            src,
            dst,
            key_set,
            ttl: outgoing.ttl.unwrap_or(self.config.parameters.default_ttl),
            mic_size: MicSize::from(outgoing.big_mic),
            response_opcode,
        })
    }
}
impl<T: Transmitter> Shared<T> {
    /// Sends `payload` (opcode + parameters) and, for local or subscribed destinations, delivers
    /// it locally.
    pub(crate) fn submit(
        self: &Arc<Self>,
        session: &mut Session,
        payload: Vec<u8>,
        request: SendRequest,
    ) -> Result<MessageHandle, SendError> {
        let (opcode, _) = Opcode::unpack_from(&payload).map_err(|_| MessagePackError::BadBytes)?;
        if payload.len() > AppPayload::max_len(request.mic_size) {
            return Err(SendError::MessageTooLong);
        }
        let local_unicast = request
            .dst
            .unicast()
            .map_or(false, |dst| session.config.is_local_element(dst));
        let deliver_locally = local_unicast || session.config.is_subscribed(&request.dst);
        let send_remote = !local_unicast && request.ttl.value() != 1;
        if !send_remote && !deliver_locally {
            return Err(SendError::InvalidDestination);
        }
        if let Some(response_opcode) = request.response_opcode {
            if session
                .pending
                .is_waiting(request.src, request.dst, response_opcode)
            {
                return Err(SendError::AwaitingResponse);
            }
        }
        let handle = MessageHandle {
            id: session.next_message_id(),
            opcode,
            src: request.src,
            dst: request.dst,
        };
        if let Some(response_opcode) = request.response_opcode {
            session.pending.insert(handle, response_opcode);
            self.start_response_timer(session, handle);
        }
        if send_remote {
            if let Err(error) = self.send_upper(session, handle, &request, payload.clone()) {
                session.cancel_response(handle.id);
                return Err(error);
            }
        }
        if deliver_locally {
            self.deliver_local(session, handle, &request, payload);
        }
        if !send_remote {
            self.emit(StackEvent::Delivered { handle });
        }
        Ok(handle)
    }
    fn send_upper(
        self: &Arc<Self>,
        session: &mut Session,
        handle: MessageHandle,
        request: &SendRequest,
        payload: Vec<u8>,
    ) -> Result<(), SendError> {
        let payload = AppPayload::new(payload);
        if payload.should_segment(request.mic_size)
            && session.outgoing.is_busy(handle.src, handle.dst)
        {
            debug!(self.logger, "queued behind another segmented message";
                "id" => handle.id.0, "dst" => %handle.dst);
            session.outgoing.enqueue(QueuedSegments {
                handle,
                request: *request,
                payload,
            });
            return Ok(());
        }
        let message = self.encrypt_upper(session, handle, request, payload)?;
        if let Some(pdu) = message.segmenter.unsegmented() {
            self.transmit(
                session,
                message.first_seq,
                message.net_key_index,
                handle.src,
                handle.dst,
                message.ttl,
                &pdu,
            )?;
            debug!(self.logger, "sent"; "id" => handle.id.0, "opcode" => %handle.opcode,
                "dst" => %handle.dst, "seq" => message.first_seq.value());
            self.emit(StackEvent::Delivered { handle });
            return Ok(());
        }
        self.start_segments(session, handle, message)
    }
    /// Allocates the sequence number of the first segment and encrypts the access payload with
    /// it.
    fn encrypt_upper(
        &self,
        session: &mut Session,
        handle: MessageHandle,
        request: &SendRequest,
        payload: AppPayload,
    ) -> Result<EncryptedMessage, SendError> {
        let seq = session.allocate_seq(handle.src)?;
        let iv_index = session.config.iv_index.tx_index();
        let aszmic = request.mic_size.is_big() && payload.should_segment(request.mic_size);
        let parts = AccessNonceParts::new(aszmic, seq, handle.src, handle.dst, iv_index);
        let encrypted = request
            .key_set
            .encrypt(&parts, handle.dst.label_uuid(), payload, request.mic_size)
            .map_err(|_| SendError::Encryption)?;
        let upper = UpperPDU::Access(UpperAccessPDU {
            akf: request.key_set.akf(),
            aid: request.key_set.aid().unwrap_or(AID::new_masked(0)),
            payload: encrypted,
        });
        let segmenter =
            Segmenter::new(upper, SeqZero::from(seq)).ok_or(SendError::MessageTooLong)?;
        Ok(EncryptedMessage {
            segmenter,
            net_key_index: request.key_set.net_key_index(),
            ttl: request.ttl,
            first_seq: seq,
        })
    }
    /// Encrypts one Lower Transport PDU into a Network PDU and hands it to the bearer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn transmit(
        &self,
        session: &Session,
        seq: SequenceNumber,
        net_key_index: NetKeyIndex,
        src: UnicastAddress,
        dst: Address,
        ttl: TTL,
        pdu: &lower::PDU,
    ) -> Result<(), SendError> {
        let iv_index = session.config.iv_index.tx_index();
        let keys = *session
            .materials
            .net_key_map
            .get_keys(net_key_index)
            .ok_or(SendError::NoNetKey)?
            .tx_key()
            .network_keys();
        let net_pdu = net::PDU {
            header: net::Header {
                ivi: iv_index.ivi(),
                nid: keys.nid(),
                ctl: pdu.ctl(),
                ttl,
                seq,
                src,
                dst: dst.as_wire(),
            },
            transport_pdu: pdu.to_bytes(),
        };
        let bytes = net_pdu
            .encrypt(&keys, iv_index)
            .map_err(|_| SendError::Encryption)?;
        self.transmitter.send(&bytes, PDUType::Network)?;
        Ok(())
    }
    /// Sends every segment once, in order, and starts the retransmission driver.
    fn start_segments(
        self: &Arc<Self>,
        session: &mut Session,
        handle: MessageHandle,
        message: EncryptedMessage,
    ) -> Result<(), SendError> {
        let EncryptedMessage {
            segmenter,
            net_key_index,
            ttl,
            first_seq,
        } = message;
        let transaction = OutgoingTransaction::new(
            handle.dst,
            segmenter.seq_zero(),
            segmenter.seg_n(),
            ttl,
            &session.config.parameters,
        );
        let pdus: Vec<lower::PDU> = segmenter.iter(transaction.outstanding()).collect();
        let mut first = Some(first_seq);
        for pdu in &pdus {
            let seq = match first.take() {
                Some(seq) => seq,
                None => session.allocate_seq(handle.src)?,
            };
            self.transmit(session, seq, net_key_index, handle.src, handle.dst, ttl, pdu)?;
        }
        debug!(self.logger, "segments sent"; "id" => handle.id.0, "dst" => %handle.dst, "segments" => pdus.len());
        let (driver, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            Arc::clone(self).drive_segments(handle.id),
            registration,
        ));
        session.outgoing.insert(OutgoingSegments {
            handle,
            segmenter,
            transaction,
            net_key_index,
            ttl,
            driver,
        });
        Ok(())
    }
    /// Retransmission timer of one segmented message. Runs until the message completes, fails or
    /// is removed.
    async fn drive_segments(self: Arc<Self>, id: MessageId) {
        loop {
            let interval = match self.session.lock().await.outgoing.get(id) {
                Some(segments) => segments.transaction.interval(),
                None => return,
            };
            tokio::time::sleep(interval).await;
            let mut session = self.session.lock().await;
            let outcome = match session.outgoing.get_mut(id) {
                Some(segments) => segments.transaction.on_timer(),
                None => return,
            };
            match outcome {
                TimerOutcome::Resend(outstanding) => {
                    if let Err(error) = self.resend(&mut session, id, outstanding) {
                        self.finish_segments(&mut session, id, Err(error));
                        return;
                    }
                }
                TimerOutcome::TimedOut => {
                    self.finish_segments(&mut session, id, Err(SendError::SegmentAckTimeout));
                    return;
                }
                TimerOutcome::Complete => {
                    self.finish_segments(&mut session, id, Ok(()));
                    return;
                }
            }
        }
    }
    fn resend(
        &self,
        session: &mut Session,
        id: MessageId,
        outstanding: lower::BlockAck,
    ) -> Result<(), SendError> {
        let (pdus, handle, net_key_index, ttl) = match session.outgoing.get(id) {
            Some(segments) => (
                segments.segmenter.iter(outstanding).collect::<Vec<_>>(),
                segments.handle,
                segments.net_key_index,
                segments.ttl,
            ),
            None => return Ok(()),
        };
        debug!(self.logger, "retransmitting"; "id" => id.0, "segments" => pdus.len());
        for pdu in &pdus {
            let seq = session.allocate_seq(handle.src)?;
            self.transmit(session, seq, net_key_index, handle.src, handle.dst, ttl, pdu)?;
        }
        Ok(())
    }
    /// Tears down an in-flight segmented message, reports the result and starts the next message
    /// queued for the same destination.
    fn finish_segments(
        self: &Arc<Self>,
        session: &mut Session,
        id: MessageId,
        result: Result<(), SendError>,
    ) {
        let handle = match session.outgoing.remove(id) {
            Some(segments) => segments.handle,
            None => return,
        };
        match result {
            Ok(()) => {
                debug!(self.logger, "segmented message delivered"; "id" => id.0, "dst" => %handle.dst);
                self.emit(StackEvent::Delivered { handle });
            }
            Err(error) => {
                info!(self.logger, "segmented message failed"; "id" => id.0, "dst" => %handle.dst, "error" => %error);
                session.cancel_response(id);
                self.emit(StackEvent::SendFailed { handle, error });
            }
        }
        self.start_next(session, handle.src, handle.dst);
    }
    fn start_next(self: &Arc<Self>, session: &mut Session, src: UnicastAddress, dst: Address) {
        while let Some(next) = session.outgoing.take_next(src, dst) {
            let handle = next.handle;
            match self.start_queued(session, next) {
                Ok(()) => break,
                Err(error) => {
                    warn!(self.logger, "queued message failed"; "id" => handle.id.0, "error" => %error);
                    session.cancel_response(handle.id);
                    self.emit(StackEvent::SendFailed { handle, error });
                }
            }
        }
    }
    /// Queued messages are encrypted only once their turn comes, so the first segment's
    /// sequence number is current.
    fn start_queued(
        self: &Arc<Self>,
        session: &mut Session,
        queued: QueuedSegments,
    ) -> Result<(), SendError> {
        let QueuedSegments {
            handle,
            request,
            payload,
        } = queued;
        let message = self.encrypt_upper(session, handle, &request, payload)?;
        self.start_segments(session, handle, message)
    }
    /// Segment Acknowledgment from `src` for one of our messages.
    pub(crate) fn handle_ack(
        self: &Arc<Self>,
        session: &mut Session,
        src: UnicastAddress,
        dst: Address,
        ack: &Ack,
    ) {
        let id = match dst
            .unicast()
            .and_then(|element| session.outgoing.find_acked(element, ack.seq_zero))
        {
            Some(id) => id,
            None => {
                debug!(self.logger, "ack for unknown message"; "src" => %src, "seq_zero" => %ack.seq_zero);
                return;
            }
        };
        let outcome = match session.outgoing.get_mut(id) {
            Some(segments) => segments.transaction.on_ack(src, ack),
            None => return,
        };
        match outcome {
            AckOutcome::Progress { resend } if !resend.is_empty() => {
                if let Err(error) = self.resend(session, id, resend) {
                    self.finish_segments(session, id, Err(error));
                }
            }
            AckOutcome::Complete => self.finish_segments(session, id, Ok(())),
            AckOutcome::Busy => self.finish_segments(session, id, Err(SendError::Busy)),
            AckOutcome::Progress { .. } | AckOutcome::Ignored => (),
        }
    }
    pub(crate) fn send_ack(
        &self,
        session: &mut Session,
        element: UnicastAddress,
        dst: UnicastAddress,
        net_key_index: NetKeyIndex,
        ttl: TTL,
        ack: &Ack,
    ) {
        let pdu = match ack.to_unsegmented() {
            Ok(pdu) => lower::PDU::UnsegmentedControl(pdu),
            Err(error) => {
                warn!(self.logger, "can't pack ack"; "error" => %error);
                return;
            }
        };
        let result = match session.allocate_seq(element) {
            Ok(seq) => self.transmit(
                session,
                seq,
                net_key_index,
                element,
                Address::Unicast(dst),
                ttl,
                &pdu,
            ),
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => {
                debug!(self.logger, "ack sent"; "dst" => %dst, "seq_zero" => %ack.seq_zero, "block_ack" => ack.block_ack.value());
            }
            Err(error) => warn!(self.logger, "ack send failed"; "dst" => %dst, "error" => %error),
        }
    }
    fn start_response_timer(self: &Arc<Self>, session: &mut Session, handle: MessageHandle) {
        let timeout = session.config.parameters.acknowledged_message_timeout;
        let shared = Arc::clone(self);
        let (timer, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            async move {
                tokio::time::sleep(timeout).await;
                let mut session = shared.session.lock().await;
                session.response_timers.remove(&handle.id);
                if session.pending.remove(handle.id).is_some() {
                    info!(shared.logger, "response timeout"; "id" => handle.id.0, "opcode" => %handle.opcode, "dst" => %handle.dst);
                    shared.emit(StackEvent::SendFailed {
                        handle,
                        error: SendError::ResponseTimeout,
                    });
                }
            },
            registration,
        ));
        session.response_timers.insert(handle.id, timer);
    }
    pub(crate) fn send_proxy_configuration(
        &self,
        session: &mut Session,
        message: &ProxyConfigurationMessage,
    ) -> Result<(), SendError> {
        let result = self.encrypt_proxy_configuration(session, message);
        match &result {
            Ok(()) => debug!(self.logger, "proxy configuration sent"; "message" => ?message),
            Err(error) => {
                warn!(self.logger, "proxy configuration failed"; "error" => %error);
                session.proxy_filter.send_failed();
            }
        }
        result
    }
    fn encrypt_proxy_configuration(
        &self,
        session: &mut Session,
        message: &ProxyConfigurationMessage,
    ) -> Result<(), SendError> {
        let src = session.config.primary_address;
        let keys = *session
            .materials
            .net_key_map
            .get_keys(session.config.primary_net_key_index)
            .ok_or(SendError::NoNetKey)?
            .tx_key()
            .network_keys();
        let seq = session.allocate_seq(src)?;
        let bytes = proxy::encrypt_configuration(
            message,
            &keys,
            session.config.iv_index.tx_index(),
            seq,
            src,
        )
        .map_err(|_| SendError::Encryption)?;
        self.transmitter.send(&bytes, PDUType::ProxyConfiguration)?;
        Ok(())
    }
}
impl<T: Transmitter> Stack<T> {
    /// Sends an access message. Acknowledged messages (those with a
    /// [`PackableMessage::response_opcode`]) also wait for the response: it arrives as a
    /// [`StackEvent::Received`] tagged with the returned handle, or the send fails with
    /// [`SendError::ResponseTimeout`].
    pub async fn send<M: PackableMessage>(
        &self,
        message: &M,
        outgoing: OutgoingMessage,
    ) -> Result<MessageHandle, SendError> {
        let payload = message.to_access_payload()?;
        self.send_payload(payload, outgoing, M::response_opcode())
            .await
    }
    /// Sends an already encoded access payload (opcode + parameters).
    pub async fn send_payload(
        &self,
        payload: Vec<u8>,
        outgoing: OutgoingMessage,
        response_opcode: Option<Opcode>,
    ) -> Result<MessageHandle, SendError> {
        let mut session = self.shared.session.lock().await;
        let request = session.resolve(&outgoing, response_opcode)?;
        self.shared.submit(&mut session, payload, request)
    }
    /// Stops a segmented or acknowledged send. No events are reported for it afterwards.
    /// Returns `false` if the message already finished.
    pub async fn cancel(&self, handle: &MessageHandle) -> bool {
        let mut session = self.shared.session.lock().await;
        let mut found = session.cancel_response(handle.id);
        if let Some(mut segments) = session.outgoing.remove(handle.id) {
            segments.transaction.cancel();
            self.shared.start_next(&mut session, handle.src, handle.dst);
            found = true;
        }
        if session.outgoing.remove_queued(handle.id).is_some() {
            found = true;
        }
        if found {
            debug!(self.shared.logger, "cancelled"; "id" => handle.id.0);
        }
        found
    }
    async fn update_proxy_filter(
        &self,
        update: impl FnOnce(&mut ProxyFilter) -> Option<ProxyConfigurationMessage>,
    ) -> Result<(), SendError> {
        let mut session = self.shared.session.lock().await;
        match update(&mut session.proxy_filter) {
            Some(message) => self.shared.send_proxy_configuration(&mut session, &message),
            None => Ok(()),
        }
    }
    pub async fn set_proxy_filter_type(&self, filter_type: FilterType) -> Result<(), SendError> {
        self.update_proxy_filter(|filter| filter.set_type(filter_type))
            .await
    }
    /// Empty inclusion list.
    pub async fn reset_proxy_filter(&self) -> Result<(), SendError> {
        self.update_proxy_filter(ProxyFilter::reset).await
    }
    pub async fn clear_proxy_filter(&self) -> Result<(), SendError> {
        self.update_proxy_filter(ProxyFilter::clear).await
    }
    pub async fn add_to_proxy_filter(&self, addresses: &[Address]) -> Result<(), SendError> {
        self.update_proxy_filter(|filter| filter.add(addresses.iter().copied()))
            .await
    }
    pub async fn remove_from_proxy_filter(&self, addresses: &[Address]) -> Result<(), SendError> {
        self.update_proxy_filter(|filter| filter.remove(addresses.iter().copied()))
            .await
    }
    /// A proxy connected. Sends the local filter to it.
    pub async fn new_proxy_did_connect(&self) -> Result<(), SendError> {
        self.update_proxy_filter(ProxyFilter::new_proxy_did_connect)
            .await
    }
    pub async fn proxy_did_disconnect(&self) {
        self.shared
            .session
            .lock()
            .await
            .proxy_filter
            .proxy_did_disconnect();
    }
    /// Snapshot of the local proxy filter.
    pub async fn proxy_filter(&self) -> ProxyFilter {
        self.shared.session.lock().await.proxy_filter.clone()
    }
}
