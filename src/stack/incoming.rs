//! Incoming PDU handler. Network decode, replay protection, reassembly and acknowledgment,
//! upper transport decryption and access dispatch.
use crate::access::{KnownMessage, MessageHandle, Opcode};
use crate::address::{Address, LabelUUID, UnicastAddress, VirtualAddress};
use crate::bearer::{PDUType, Transmitter};
use crate::control::{Ack, ControlPDU};
use crate::crypto::nonce::AccessNonceParts;
use crate::crypto::MicSize;
use crate::lower;
use crate::mesh::{AppKeyIndex, IVIndex, NetKeyIndex, SeqAuth, SequenceNumber, IVI, NID, TTL};
use crate::models::config::messages::node_reset;
use crate::models::{MessagePackError, PackableMessage};
use crate::net;
use crate::proxy::{self, ProxyConfigurationMessage, StatusOutcome};
use crate::reassembler::{self, Context};
use crate::stack::messages::{IncomingMessage, StackEvent};
use crate::stack::outgoing::SendRequest;
use crate::stack::segments::{CompletedAck, IncomingSegments, ReassemblyKey};
use crate::stack::{RecvError, Session, Shared, Stack};
use crate::upper::{self, EncryptedAppPayload, KeySet, UpperAccessPDU, UpperPDU};
use core::convert::TryFrom;
use core::time::Duration;
use futures_util::future::{AbortHandle, Abortable};
use slog::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::time::Instant;

/// Network layer fields the upper layers care about.
#[derive(Copy, Clone, Debug)]
struct NetworkMeta {
    src: UnicastAddress,
    dst: Address,
    ttl: TTL,
    net_key_index: NetKeyIndex,
}
/// Decrypted access message about to be dispatched.
pub(crate) struct AccessReceipt {
    src: UnicastAddress,
    dst: Address,
    label: Option<LabelUUID>,
    net_key_index: NetKeyIndex,
    app_key_index: Option<AppKeyIndex>,
    ttl: TTL,
    payload: Vec<u8>,
    /// Opened with this node's own device key.
    local_device_key: bool,
}
fn insert_segment(context: &mut Context, pdu: &lower::PDU) -> Result<bool, RecvError> {
    match pdu {
        lower::PDU::SegmentedAccess(access) => Ok(context.insert_access(access)?),
        lower::PDU::SegmentedControl(control) => Ok(context.insert_control(control)?),
        _ => Err(RecvError::MalformedLowerPDU),
    }
}
impl<T: Transmitter> Shared<T> {
    fn handle_network_pdu(
        self: &Arc<Self>,
        session: &mut Session,
        data: &[u8],
    ) -> Result<(), RecvError> {
        if data.len() < net::MIN_ACCESS_PDU_LEN {
            return Err(RecvError::MalformedNetworkPDU);
        }
        let net::DecodedPDU {
            net_key_index,
            iv_index,
            pdu,
        } = match net::decode(data, &session.materials.net_key_map, &session.config.iv_index) {
            Some(decoded) => decoded,
            None => {
                debug!(self.logger, "network pdu dropped"; "reason" => "no network key could decrypt it", "len" => data.len());
                return Ok(());
            }
        };
        let header = pdu.header;
        if session.config.is_local_element(header.src) {
            trace!(self.logger, "own network pdu"; "seq" => header.seq.value());
            return Ok(());
        }
        if !session.config.is_for_us(&header.dst) {
            trace!(self.logger, "network pdu for another node"; "dst" => %header.dst);
            return Ok(());
        }
        let lower_pdu = lower::PDU::from_bytes(&pdu.transport_pdu, header.ctl)
            .ok_or(RecvError::MalformedLowerPDU)?;
        let meta = NetworkMeta {
            src: header.src,
            dst: header.dst,
            ttl: header.ttl,
            net_key_index,
        };
        let seq_auth = SeqAuth::new(header.seq, iv_index);
        match &lower_pdu {
            lower::PDU::UnsegmentedAccess(access) => {
                self.check_replay(session, meta.src, seq_auth)?;
                let payload = EncryptedAppPayload::from_bytes(access.upper_pdu(), MicSize::Small)
                    .ok_or(RecvError::MalformedLowerPDU)?;
                self.handle_upper_access(
                    session,
                    meta,
                    seq_auth,
                    false,
                    UpperAccessPDU {
                        akf: access.akf(),
                        aid: access.aid(),
                        payload,
                    },
                )
            }
            lower::PDU::UnsegmentedControl(control) => {
                self.check_replay(session, meta.src, seq_auth)?;
                let control = ControlPDU::try_from(control)?;
                self.handle_control(session, meta, control);
                Ok(())
            }
            lower::PDU::SegmentedAccess(_) | lower::PDU::SegmentedControl(_) => {
                self.handle_segment(session, meta, header.seq, iv_index, &lower_pdu)
            }
        }
    }
    fn check_replay(
        &self,
        session: &mut Session,
        src: UnicastAddress,
        seq_auth: SeqAuth,
    ) -> Result<(), RecvError> {
        if session.replay.replay_check(src, seq_auth) {
            debug!(self.logger, "replay dropped"; "src" => %src, "seq" => seq_auth.seq().value());
            Err(RecvError::Replay)
        } else {
            Ok(())
        }
    }
    fn handle_segment(
        self: &Arc<Self>,
        session: &mut Session,
        meta: NetworkMeta,
        seq: SequenceNumber,
        iv_index: IVIndex,
        pdu: &lower::PDU,
    ) -> Result<(), RecvError> {
        let (seg_header, new_context) = match pdu {
            lower::PDU::SegmentedAccess(access) => (*access.header(), Context::from(access)),
            lower::PDU::SegmentedControl(control) => (*control.header(), Context::from(control)),
            _ => return Err(RecvError::MalformedLowerPDU),
        };
        let seq_auth = reassembler::first_seq_auth(&seg_header, seq, iv_index)
            .ok_or(RecvError::MalformedLowerPDU)?;
        let parameters = session.config.parameters;
        if let Some(completed) = session.reassembly.completed_mut(meta.src, seq_auth) {
            // Our ack got lost. Repeat it, but not more often than the complete ack interval.
            let now = Instant::now();
            if now.duration_since(completed.last_sent) >= parameters.complete_ack_interval() {
                completed.last_sent = now;
                let (element, net_key_index, ttl, ack) = (
                    completed.element,
                    completed.net_key_index,
                    completed.ttl,
                    completed.ack,
                );
                self.send_ack(session, element, meta.src, net_key_index, ttl, &ack);
            }
            return Ok(());
        }
        if session.replay.is_old(meta.src, seq_auth) {
            debug!(self.logger, "old segment dropped"; "src" => %meta.src, "seq_zero" => %seg_header.seq_zero);
            return Err(RecvError::Replay);
        }
        let key: ReassemblyKey = (meta.src, seg_header.seq_zero);
        if session
            .reassembly
            .get(&key)
            .map_or(false, |entry| entry.seq_auth != seq_auth)
        {
            session.reassembly.remove(&key);
        }
        match session.reassembly.get_mut(&key) {
            Some(entry) => {
                if insert_segment(&mut entry.context, pdu)? {
                    entry.discard_timer.abort();
                    entry.discard_timer = self.spawn_discard_timer(key, parameters.incomplete_timeout);
                }
            }
            None => {
                let mut context = new_context;
                insert_segment(&mut context, pdu)?;
                let ack_ttl = if meta.ttl.value() == 0 {
                    meta.ttl
                } else {
                    parameters.default_ttl
                };
                let discard_timer = self.spawn_discard_timer(key, parameters.incomplete_timeout);
                session.reassembly.insert(
                    key,
                    IncomingSegments {
                        context,
                        seq_auth,
                        dst: meta.dst,
                        net_key_index: meta.net_key_index,
                        ack_ttl,
                        discard_timer,
                        ack_timer: None,
                    },
                );
            }
        }
        trace!(self.logger, "segment"; "src" => %meta.src, "seq_zero" => %seg_header.seq_zero, "seg_o" => u8::from(seg_header.seg_o));
        let ready = session
            .reassembly
            .get(&key)
            .map_or(false, |entry| entry.context.is_ready());
        if ready {
            return self.complete_segments(session, meta, key);
        }
        if meta.dst.is_unicast() {
            let ack_delay = parameters.ack_timer(u8::from(seg_header.seg_n));
            let needs_timer = session
                .reassembly
                .get(&key)
                .map_or(false, |entry| entry.ack_timer.is_none());
            if needs_timer {
                let timer = self.spawn_ack_timer(key, ack_delay);
                if let Some(entry) = session.reassembly.get_mut(&key) {
                    entry.ack_timer = Some(timer);
                }
            }
        }
        Ok(())
    }
    fn complete_segments(
        self: &Arc<Self>,
        session: &mut Session,
        meta: NetworkMeta,
        key: ReassemblyKey,
    ) -> Result<(), RecvError> {
        let entry = match session.reassembly.remove(&key) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        session.replay.replay_check(meta.src, entry.seq_auth);
        let upper_pdu = entry.context.finish().ok_or(RecvError::MalformedLowerPDU)?;
        if let Some(element) = entry.dst.unicast() {
            let ack = Ack {
                obo: false,
                seq_zero: key.1,
                block_ack: entry.context.block_ack(),
            };
            self.send_ack(
                session,
                element,
                meta.src,
                entry.net_key_index,
                entry.ack_ttl,
                &ack,
            );
            session.reassembly.record_completed(
                meta.src,
                CompletedAck {
                    seq_auth: entry.seq_auth,
                    ack,
                    element,
                    net_key_index: entry.net_key_index,
                    ttl: entry.ack_ttl,
                    last_sent: Instant::now(),
                },
            );
        }
        debug!(self.logger, "reassembled"; "src" => %meta.src, "seq_zero" => %key.1, "len" => upper_pdu.len());
        match upper_pdu {
            UpperPDU::Access(access) => {
                self.handle_upper_access(session, meta, entry.seq_auth, true, access)
            }
            UpperPDU::Control(payload) => {
                let control = ControlPDU::try_from(&payload)?;
                self.handle_control(session, meta, control);
                Ok(())
            }
        }
    }
    /// Drops the reassembly state of `key` when no segment arrives for `timeout`.
    fn spawn_discard_timer(self: &Arc<Self>, key: ReassemblyKey, timeout: Duration) -> AbortHandle {
        let shared = Arc::clone(self);
        let (timer, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            async move {
                tokio::time::sleep(timeout).await;
                let mut session = shared.session.lock().await;
                if session.reassembly.remove(&key).is_some() {
                    info!(shared.logger, "incomplete message discarded"; "src" => %key.0, "seq_zero" => %key.1);
                }
            },
            registration,
        ));
        timer
    }
    /// Acknowledges the segments received so far for `key` after `delay`.
    fn spawn_ack_timer(self: &Arc<Self>, key: ReassemblyKey, delay: Duration) -> AbortHandle {
        let shared = Arc::clone(self);
        let (timer, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            async move {
                tokio::time::sleep(delay).await;
                let mut session = shared.session.lock().await;
                let pending = session.reassembly.get_mut(&key).and_then(|entry| {
                    entry.ack_timer = None;
                    let element = entry.dst.unicast()?;
                    Some((
                        element,
                        entry.net_key_index,
                        entry.ack_ttl,
                        Ack {
                            obo: false,
                            seq_zero: key.1,
                            block_ack: entry.context.block_ack(),
                        },
                    ))
                });
                if let Some((element, net_key_index, ttl, ack)) = pending {
                    shared.send_ack(&mut session, element, key.0, net_key_index, ttl, &ack);
                }
            },
            registration,
        ));
        timer
    }
    fn handle_upper_access(
        self: &Arc<Self>,
        session: &mut Session,
        meta: NetworkMeta,
        seq_auth: SeqAuth,
        segmented: bool,
        upper_pdu: UpperAccessPDU,
    ) -> Result<(), RecvError> {
        let parts = AccessNonceParts::new(
            segmented && upper_pdu.szmic().0,
            seq_auth.seq(),
            meta.src,
            meta.dst,
            seq_auth.iv_index(),
        );
        let opened = match upper::open_access(
            &session.materials,
            meta.net_key_index,
            &upper_pdu,
            &parts,
            &session.config.labels,
        ) {
            Some(opened) => opened,
            None => {
                debug!(self.logger, "access message dropped"; "reason" => "no key could decrypt it", "src" => %meta.src, "dst" => %meta.dst);
                return Ok(());
            }
        };
        let (app_key_index, local_device_key) = match opened.key_set {
            KeySet::Application { app_key_index, .. } => (Some(app_key_index), false),
            KeySet::Device { key, .. } => (None, key == session.materials.dev_key),
        };
        let dst = match &opened.label {
            Some(label) => Address::Virtual(VirtualAddress::new(label)),
            None => meta.dst,
        };
        self.handle_access(
            session,
            AccessReceipt {
                src: meta.src,
                dst,
                label: opened.label,
                net_key_index: meta.net_key_index,
                app_key_index,
                ttl: meta.ttl,
                payload: opened.payload.into_inner(),
                local_device_key,
            },
        )
    }
    /// Hands a message sent to a local element (or a subscribed address) straight to the access
    /// layer.
    pub(crate) fn deliver_local(
        self: &Arc<Self>,
        session: &mut Session,
        handle: MessageHandle,
        request: &SendRequest,
        payload: Vec<u8>,
    ) {
        let (app_key_index, local_device_key) = match request.key_set {
            KeySet::Application { app_key_index, .. } => (Some(app_key_index), false),
            KeySet::Device { key, .. } => (None, key == session.materials.dev_key),
        };
        let receipt = AccessReceipt {
            src: handle.src,
            dst: handle.dst,
            label: handle.dst.label_uuid().copied(),
            net_key_index: request.key_set.net_key_index(),
            app_key_index,
            ttl: request.ttl,
            payload,
            local_device_key,
        };
        if let Err(error) = self.handle_access(session, receipt) {
            debug!(self.logger, "local delivery failed"; "id" => handle.id.0, "error" => %error);
        }
    }
    fn handle_access(self: &Arc<Self>, session: &mut Session, receipt: AccessReceipt) -> Result<(), RecvError> {
        let (opcode, _) = Opcode::unpack_from(&receipt.payload)
            .map_err(|_| RecvError::MalformedAccess(MessagePackError::BadBytes))?;
        let message = session.registry.decode(&receipt.payload)?;
        let response_to = session
            .pending
            .take_response(receipt.src, receipt.dst, opcode)
            .map(|pending| pending.handle);
        if let Some(handle) = &response_to {
            if let Some(timer) = session.response_timers.remove(&handle.id) {
                timer.abort();
            }
        }
        let reset_element = match (&message, receipt.dst.unicast()) {
            (KnownMessage::ConfigNodeReset(_), Some(dst))
                if receipt.local_device_key && session.config.is_local_element(dst) =>
            {
                Some(dst)
            }
            _ => None,
        };
        debug!(self.logger, "received"; "src" => %receipt.src, "dst" => %receipt.dst, "opcode" => %opcode, "len" => receipt.payload.len());
        self.emit(StackEvent::Received(IncomingMessage {
            src: receipt.src,
            dst: receipt.dst,
            label: receipt.label,
            net_key_index: receipt.net_key_index,
            app_key_index: receipt.app_key_index,
            ttl: receipt.ttl,
            payload: receipt.payload,
            message,
            response_to,
        }));
        if let Some(element) = reset_element {
            self.acknowledge_node_reset(session, element, receipt.src, receipt.net_key_index);
        }
        Ok(())
    }
    /// Answers `ConfigNodeReset` with `ConfigNodeResetStatus` and reports the reset.
    fn acknowledge_node_reset(
        self: &Arc<Self>,
        session: &mut Session,
        element: UnicastAddress,
        client: UnicastAddress,
        net_key_index: NetKeyIndex,
    ) {
        let request = SendRequest {
            src: element,
            dst: Address::Unicast(client),
            key_set: KeySet::Device {
                net_key_index,
                key: session.materials.dev_key,
            },
            ttl: session.config.parameters.default_ttl,
            mic_size: MicSize::Small,
            response_opcode: None,
        };
        let result = node_reset::Status
            .to_access_payload()
            .map_err(crate::stack::SendError::from)
            .and_then(|payload| self.submit(session, payload, request));
        if let Err(error) = result {
            warn!(self.logger, "node reset status failed"; "client" => %client, "error" => %error);
        }
        warn!(self.logger, "node reset"; "client" => %client);
        self.emit(StackEvent::NetworkReset);
    }
    fn handle_control(self: &Arc<Self>, session: &mut Session, meta: NetworkMeta, control: ControlPDU) {
        match control {
            ControlPDU::Ack(ack) => self.handle_ack(session, meta.src, meta.dst, &ack),
            ControlPDU::Heartbeat(heartbeat) => {
                let hops = heartbeat.hops(meta.ttl.value());
                debug!(self.logger, "heartbeat"; "src" => %meta.src, "hops" => hops);
                self.emit(StackEvent::HeartbeatReceived {
                    src: meta.src,
                    dst: meta.dst,
                    init_ttl: heartbeat.init_ttl,
                    hops,
                    features: heartbeat.features,
                });
            }
            ControlPDU::Other(payload) => {
                debug!(self.logger, "unhandled control message"; "src" => %meta.src, "opcode" => ?payload.opcode);
            }
        }
    }
    fn handle_proxy_configuration(
        self: &Arc<Self>,
        session: &mut Session,
        data: &[u8],
    ) -> Result<(), RecvError> {
        if data.len() < net::MIN_CONTROL_PDU_LEN {
            return Err(RecvError::MalformedNetworkPDU);
        }
        let (nid, ivi) = NID::new_with_flag(data[0]);
        let decrypted = session.config.iv_index.rx_index(IVI(ivi)).and_then(|iv_index| {
            session
                .materials
                .net_key_map
                .matching_nid(nid)
                .find_map(|(_, materials)| {
                    proxy::decrypt_configuration(data, materials.network_keys(), iv_index)
                })
        });
        let (src, message) = match decrypted {
            Some(decrypted) => decrypted,
            None => {
                debug!(self.logger, "proxy configuration dropped"; "reason" => "no network key could decrypt it");
                return Ok(());
            }
        };
        match message {
            ProxyConfigurationMessage::FilterStatus {
                filter_type,
                list_size,
            } => {
                let outcome = session
                    .proxy_filter
                    .handle_status(Some(src), filter_type, list_size);
                self.apply_status_outcome(session, outcome);
            }
            other => {
                debug!(self.logger, "unexpected proxy configuration message"; "src" => %src, "message" => ?other);
            }
        }
        Ok(())
    }
    fn apply_status_outcome(&self, session: &mut Session, outcome: StatusOutcome) {
        let next = match outcome {
            StatusOutcome::SendNext(message) => Some(message),
            StatusOutcome::Acknowledged {
                filter_type,
                list_size,
            } => {
                debug!(self.logger, "proxy filter acknowledged"; "list_size" => list_size);
                self.emit(StackEvent::ProxyFilterUpdated {
                    filter_type,
                    list_size,
                });
                None
            }
            StatusOutcome::LimitedProxyFilterDetected { max_size, send } => {
                warn!(self.logger, "proxy filter is limited"; "max_size" => max_size);
                self.emit(StackEvent::LimitedProxyFilterDetected { max_size });
                send
            }
            StatusOutcome::Resynchronizing(send) => {
                info!(self.logger, "proxy filter out of sync, resending");
                send
            }
            StatusOutcome::LostTrack => {
                warn!(self.logger, "proxy filter still out of sync");
                None
            }
        };
        if let Some(message) = next {
            // Failures are logged and reset the busy flag.
            self.send_proxy_configuration(session, &message).ok();
        }
    }
}
impl<T: Transmitter> Stack<T> {
    /// Processes one PDU delivered by the bearer. PDUs that fail authentication or aren't for
    /// this node are dropped and return `Ok`.
    pub async fn handle_incoming(&self, data: &[u8], pdu_type: PDUType) -> Result<(), RecvError> {
        let mut session = self.shared.session.lock().await;
        let result = match pdu_type {
            PDUType::Network => self.shared.handle_network_pdu(&mut session, data),
            PDUType::ProxyConfiguration => {
                self.shared.handle_proxy_configuration(&mut session, data)
            }
            PDUType::MeshBeacon | PDUType::Provisioning => {
                Err(RecvError::UnsupportedPDUType(pdu_type))
            }
        };
        if let Err(error) = &result {
            debug!(self.shared.logger, "incoming pdu rejected"; "type" => ?pdu_type, "error" => %error);
        }
        result
    }
}
