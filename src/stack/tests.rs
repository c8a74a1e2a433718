use super::*;
use crate::access::KnownMessage;
use crate::address::{GroupAddress, LabelUUID};
use crate::control::{Ack, ControlMessage, Features, Heartbeat};
use crate::crypto::key::{AppKey, DevKey, NetKey};
use crate::crypto::materials::NetworkKeys;
use crate::lower::{self, BlockAck, SeqZero};
use crate::mesh::{AppKeyIndex, IVIndex, TTL};
use crate::models::config::messages::node_reset;
use crate::models::generics::onoff;
use crate::net;
use crate::proxy::{self, FilterType, ProxyConfigurationMessage};
use core::time::Duration;
use std::sync::Mutex as StdMutex;
use tokio::time::Instant;

const NET_KEY: &str = "7dd7364cd842ad18c17c2b820c84c3d6";
const APP_KEY: &str = "63964771734fbd76e3b40519d1d94a48";
const IV_INDEX: u32 = 0x1234_5678;
const NODE_A: u16 = 0x0001;
const NODE_B: u16 = 0x0002;

#[derive(Default)]
struct RecordingTransmitter {
    sent: StdMutex<Vec<(Vec<u8>, PDUType)>>,
}
impl RecordingTransmitter {
    fn take(&self) -> Vec<(Vec<u8>, PDUType)> {
        core::mem::take(&mut *self.sent.lock().unwrap())
    }
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}
impl Transmitter for RecordingTransmitter {
    fn send(&self, data: &[u8], pdu_type: PDUType) -> Result<(), BearerError> {
        self.sent.lock().unwrap().push((data.to_vec(), pdu_type));
        Ok(())
    }
}
type TestStack = Stack<Arc<RecordingTransmitter>>;
struct Node {
    stack: TestStack,
    events: mpsc::UnboundedReceiver<StackEvent>,
    radio: Arc<RecordingTransmitter>,
}
fn dev_key(address: u16) -> DevKey {
    DevKey::from_hex(&format!("{:032x}", 0x9d6d_d0e9_6eb2_5dc1_u128 + u128::from(address))).unwrap()
}
fn network_keys() -> NetworkKeys {
    NetworkKeys::from(&NetKey::from_hex(NET_KEY).unwrap())
}
fn materials(address: u16) -> SecurityMaterials {
    let mut materials = SecurityMaterials::new(dev_key(address));
    materials
        .net_key_map
        .insert(NetKeyIndex::new(0), &NetKey::from_hex(NET_KEY).unwrap());
    materials.app_key_map.insert(
        AppKeyIndex::new(0),
        AppKey::from_hex(APP_KEY).unwrap(),
        NetKeyIndex::new(0),
    );
    materials
}
fn node_with(address: u16, materials: SecurityMaterials) -> Node {
    let radio = Arc::new(RecordingTransmitter::default());
    let config = StackConfig::new(
        UnicastAddress::new(address),
        1,
        IVIndexState::new(IVIndex(IV_INDEX)),
    );
    let logger = Logger::root(slog::Discard, o!());
    let (stack, events) = Stack::new(
        Arc::clone(&radio),
        config,
        materials,
        MemoryStore::new(),
        &logger,
    );
    Node {
        stack,
        events,
        radio,
    }
}
fn node(address: u16) -> Node {
    node_with(address, materials(address))
}
fn app(dst: Address) -> OutgoingMessage {
    OutgoingMessage::new(dst, MessageKeys::App(AppKeyIndex::new(0)))
}
fn unicast(address: u16) -> Address {
    Address::Unicast(UnicastAddress::new(address))
}
/// Opcode 0x01 with 16 bytes of parameters. Two access segments with a 32-bit TransMIC.
fn long_payload() -> Vec<u8> {
    let mut payload = vec![0x01];
    payload.extend(0..16_u8);
    payload
}
fn on_off(on_off: bool) -> onoff::SetUnacknowledged {
    onoff::SetUnacknowledged(onoff::SetParameters {
        on_off,
        tid: 1,
        transition: None,
    })
}
/// Network PDU from a remote node that isn't a `Stack`.
fn network_pdu(src: u16, dst: Address, seq: u32, ttl: u8, pdu: &lower::PDU) -> Vec<u8> {
    let keys = network_keys();
    let iv_index = IVIndex(IV_INDEX);
    net::PDU {
        header: net::Header {
            ivi: iv_index.ivi(),
            nid: keys.nid(),
            ctl: pdu.ctl(),
            ttl: TTL::new(ttl),
            seq: SequenceNumber::new_masked(seq),
            src: UnicastAddress::new(src),
            dst,
        },
        transport_pdu: pdu.to_bytes(),
    }
    .encrypt(&keys, iv_index)
    .unwrap()
}
fn ack_pdu(seq_zero: u16, block_ack: u32) -> lower::PDU {
    lower::PDU::UnsegmentedControl(
        Ack {
            obo: false,
            seq_zero: SeqZero::new(seq_zero),
            block_ack: BlockAck::new(block_ack),
        }
        .to_unsegmented()
        .unwrap(),
    )
}
/// Hands everything `from` transmitted to `to`.
async fn relay(from: &Node, to: &Node) {
    for (pdu, pdu_type) in from.radio.take() {
        to.stack.handle_incoming(&pdu, pdu_type).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_segments_time_out_after_retransmissions() {
    let mut a = node(NODE_A);
    let start = Instant::now();
    let handle = a
        .stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    assert_eq!(a.radio.count(), 2);
    match a.events.recv().await.unwrap() {
        StackEvent::SendFailed { handle: failed, error } => {
            assert_eq!(failed, handle);
            assert_eq!(error, SendError::SegmentAckTimeout);
        }
        other => panic!("unexpected event {:?}", other),
    }
    // Default TTL 5: 200ms + 4 * 50ms between rounds. Initial send plus three retransmissions.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1600), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2000), "{:?}", elapsed);
    assert_eq!(a.radio.count(), 8);
}
#[tokio::test(start_paused = true)]
async fn test_busy_ack_fails_send() {
    let mut a = node(NODE_A);
    let handle = a
        .stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    // First sequence number of a fresh store is 0, so SeqZero is 0.
    let busy = network_pdu(NODE_B, unicast(NODE_A), 0, 5, &ack_pdu(0, 0));
    a.stack
        .handle_incoming(&busy, PDUType::Network)
        .await
        .unwrap();
    match a.events.recv().await.unwrap() {
        StackEvent::SendFailed { handle: failed, error } => {
            assert_eq!(failed, handle);
            assert_eq!(error, SendError::Busy);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
#[tokio::test(start_paused = true)]
async fn test_partial_ack_resends_missing_segment() {
    let mut a = node(NODE_A);
    a.stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    assert_eq!(a.radio.take().len(), 2);
    let partial = network_pdu(NODE_B, unicast(NODE_A), 0, 5, &ack_pdu(0, 0b01));
    a.stack
        .handle_incoming(&partial, PDUType::Network)
        .await
        .unwrap();
    assert_eq!(a.radio.take().len(), 1);
    let full = network_pdu(NODE_B, unicast(NODE_A), 1, 5, &ack_pdu(0, 0b11));
    a.stack
        .handle_incoming(&full, PDUType::Network)
        .await
        .unwrap();
    assert!(matches!(
        a.events.recv().await.unwrap(),
        StackEvent::Delivered { .. }
    ));
}
#[tokio::test(start_paused = true)]
async fn test_cancel_stops_retransmissions() {
    let mut a = node(NODE_A);
    let handle = a
        .stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    assert!(a.stack.cancel(&handle).await);
    assert!(!a.stack.cancel(&handle).await);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(a.radio.count(), 2);
    assert!(a.events.try_recv().is_err());
}
#[tokio::test(start_paused = true)]
async fn test_second_message_waits_for_first() {
    let mut a = node(NODE_A);
    let first = a
        .stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    let second = a
        .stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    assert_eq!(a.radio.take().len(), 2);
    // Sequence numbers 0 and 1 went to the first message, 2 to this one.
    let between = a
        .stack
        .send(&on_off(true), app(unicast(NODE_B)))
        .await
        .unwrap();
    assert_eq!(a.radio.take().len(), 1);
    match a.events.recv().await.unwrap() {
        StackEvent::Delivered { handle } => assert_eq!(handle, between),
        other => panic!("unexpected event {:?}", other),
    }
    let ack = network_pdu(NODE_B, unicast(NODE_A), 0, 5, &ack_pdu(0, 0b11));
    a.stack
        .handle_incoming(&ack, PDUType::Network)
        .await
        .unwrap();
    match a.events.recv().await.unwrap() {
        StackEvent::Delivered { handle } => assert_eq!(handle, first),
        other => panic!("unexpected event {:?}", other),
    }
    // The queued message is encrypted when it starts, with the next free sequence number.
    let segments: Vec<(u32, SeqZero)> = a
        .radio
        .take()
        .iter()
        .map(|(bytes, _)| {
            let pdu = net::PDU::decrypt(bytes, &network_keys(), IVIndex(IV_INDEX)).unwrap();
            let lower = lower::PDU::from_bytes(&pdu.transport_pdu, pdu.header.ctl).unwrap();
            (pdu.header.seq.value(), lower.segment_header().unwrap().seq_zero)
        })
        .collect();
    assert_eq!(segments, vec![(3, SeqZero::new(3)), (4, SeqZero::new(3))]);
    let ack = network_pdu(NODE_B, unicast(NODE_A), 1, 5, &ack_pdu(3, 0b11));
    a.stack
        .handle_incoming(&ack, PDUType::Network)
        .await
        .unwrap();
    match a.events.recv().await.unwrap() {
        StackEvent::Delivered { handle } => assert_eq!(handle, second),
        other => panic!("unexpected event {:?}", other),
    }
}
#[tokio::test(start_paused = true)]
async fn test_response_timeout() {
    let mut a = node(NODE_A);
    let handle = a
        .stack
        .send(&onoff::Get, app(unicast(NODE_B)))
        .await
        .unwrap();
    assert!(matches!(
        a.events.recv().await.unwrap(),
        StackEvent::Delivered { .. }
    ));
    let start = Instant::now();
    match a.events.recv().await.unwrap() {
        StackEvent::SendFailed { handle: failed, error } => {
            assert_eq!(failed, handle);
            assert_eq!(error, SendError::ResponseTimeout);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(start.elapsed() >= Duration::from_secs(30));
}
#[tokio::test(start_paused = true)]
async fn test_identical_request_rejected_while_awaiting_response() {
    let mut a = node(NODE_A);
    let first = a
        .stack
        .send(&onoff::Get, app(unicast(NODE_B)))
        .await
        .unwrap();
    assert!(matches!(
        a.stack.send(&onoff::Get, app(unicast(NODE_B))).await,
        Err(SendError::AwaitingResponse)
    ));
    assert_eq!(a.radio.take().len(), 1);
    let elsewhere = a
        .stack
        .send(&onoff::Get, app(unicast(0x0003)))
        .await
        .unwrap();
    for expected in [first, elsewhere] {
        match a.events.recv().await.unwrap() {
            StackEvent::Delivered { handle } => assert_eq!(handle, expected),
            other => panic!("unexpected event {:?}", other),
        }
    }
    tokio::time::sleep(Duration::from_secs(61)).await;
    let mut timed_out = Vec::new();
    for _ in 0..2 {
        match a.events.recv().await.unwrap() {
            StackEvent::SendFailed { handle, error } => {
                assert_eq!(error, SendError::ResponseTimeout);
                timed_out.push(handle);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(timed_out.contains(&first));
    assert!(timed_out.contains(&elsewhere));
    assert!(a.events.try_recv().is_err());
    a.stack
        .send(&onoff::Get, app(unicast(NODE_B)))
        .await
        .unwrap();
}
#[tokio::test(start_paused = true)]
async fn test_node_reset_is_acknowledged() {
    let mut a_materials = materials(NODE_A);
    a_materials
        .dev_key_map
        .insert(UnicastAddress::new(NODE_B), 1, dev_key(NODE_B));
    let mut a = node_with(NODE_A, a_materials);
    let mut b = node(NODE_B);
    let handle = a
        .stack
        .send(
            &node_reset::Reset,
            OutgoingMessage::new(unicast(NODE_B), MessageKeys::Device(NetKeyIndex::new(0))),
        )
        .await
        .unwrap();
    assert!(matches!(
        a.events.recv().await.unwrap(),
        StackEvent::Delivered { .. }
    ));
    relay(&a, &b).await;
    match b.events.recv().await.unwrap() {
        StackEvent::Received(message) => {
            assert!(matches!(message.message, KnownMessage::ConfigNodeReset(_)));
            assert_eq!(message.app_key_index, None);
            assert_eq!(message.src, UnicastAddress::new(NODE_A));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        b.events.recv().await.unwrap(),
        StackEvent::Delivered { .. }
    ));
    assert!(matches!(
        b.events.recv().await.unwrap(),
        StackEvent::NetworkReset
    ));
    relay(&b, &a).await;
    match a.events.recv().await.unwrap() {
        StackEvent::Received(message) => {
            assert!(matches!(
                message.message,
                KnownMessage::ConfigNodeResetStatus(_)
            ));
            assert_eq!(message.response_to, Some(handle));
        }
        other => panic!("unexpected event {:?}", other),
    }
}
#[tokio::test(start_paused = true)]
async fn test_node_reset_needs_local_device_key() {
    let mut a = node(NODE_A);
    let mut b = node(NODE_B);
    // Without B's device key A falls back to its own, which B can't open.
    a.stack
        .send(
            &node_reset::Reset,
            OutgoingMessage::new(unicast(NODE_B), MessageKeys::Device(NetKeyIndex::new(0))),
        )
        .await
        .unwrap();
    assert!(matches!(
        a.events.recv().await.unwrap(),
        StackEvent::Delivered { .. }
    ));
    relay(&a, &b).await;
    assert!(b.events.try_recv().is_err());
    assert_eq!(b.radio.count(), 0);
}
#[tokio::test(start_paused = true)]
async fn test_segmented_message_end_to_end() {
    let mut a = node(NODE_A);
    let mut b = node(NODE_B);
    let handle = a
        .stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    let segments = a.radio.take();
    assert_eq!(segments.len(), 2);

    let mut tampered = segments[1].0.clone();
    if let Some(last) = tampered.last_mut() {
        *last ^= 0x01;
    }
    b.stack
        .handle_incoming(&tampered, PDUType::Network)
        .await
        .unwrap();
    for (pdu, pdu_type) in segments.iter().rev() {
        b.stack.handle_incoming(pdu, *pdu_type).await.unwrap();
    }
    match b.events.recv().await.unwrap() {
        StackEvent::Received(message) => {
            assert_eq!(message.payload, long_payload());
            assert_eq!(message.src, UnicastAddress::new(NODE_A));
            assert_eq!(message.dst, unicast(NODE_B));
            assert_eq!(message.app_key_index, Some(AppKeyIndex::new(0)));
            assert!(matches!(message.message, KnownMessage::Unknown { .. }));
        }
        other => panic!("unexpected event {:?}", other),
    }
    // A late duplicate gets the cached ack, at most once per interval.
    b.stack
        .handle_incoming(&segments[0].0, PDUType::Network)
        .await
        .unwrap();
    assert_eq!(b.radio.count(), 1);

    relay(&b, &a).await;
    match a.events.recv().await.unwrap() {
        StackEvent::Delivered { handle: delivered } => assert_eq!(delivered, handle),
        other => panic!("unexpected event {:?}", other),
    }
}
#[tokio::test(start_paused = true)]
async fn test_incomplete_message_is_acked_then_discarded() {
    let a = node(NODE_A);
    let b = node(NODE_B);
    a.stack
        .send_payload(long_payload(), app(unicast(NODE_B)), None)
        .await
        .unwrap();
    let segments = a.radio.take();
    b.stack
        .handle_incoming(&segments[0].0, PDUType::Network)
        .await
        .unwrap();
    assert_eq!(b.stack.shared.session.lock().await.reassembly.len(), 1);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(b.stack.shared.session.lock().await.reassembly.len(), 0);
    // One ack from the ack timer for the segment that did arrive.
    assert_eq!(b.radio.count(), 1);
}
#[tokio::test(start_paused = true)]
async fn test_local_delivery_skips_the_bearer() {
    let mut a = node(NODE_A);
    let handle = a
        .stack
        .send(&on_off(true), app(unicast(NODE_A)))
        .await
        .unwrap();
    match a.events.recv().await.unwrap() {
        StackEvent::Received(message) => {
            assert!(matches!(
                message.message,
                KnownMessage::GenericOnOffSetUnacknowledged(_)
            ));
            assert_eq!(message.src, UnicastAddress::new(NODE_A));
        }
        other => panic!("unexpected event {:?}", other),
    }
    match a.events.recv().await.unwrap() {
        StackEvent::Delivered { handle: delivered } => assert_eq!(delivered, handle),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(a.radio.count(), 0);
}
#[tokio::test(start_paused = true)]
async fn test_subscribed_group_is_sent_and_delivered() {
    let mut a = node(NODE_A);
    let group = Address::Group(GroupAddress::new(0xC000));
    a.stack.subscribe(group).await;
    a.stack.send(&on_off(false), app(group)).await.unwrap();
    assert_eq!(a.radio.count(), 1);
    let first = a.events.recv().await.unwrap();
    let second = a.events.recv().await.unwrap();
    let received = [&first, &second]
        .iter()
        .filter(|event| matches!(event, StackEvent::Received(_)))
        .count();
    let delivered = [&first, &second]
        .iter()
        .filter(|event| matches!(event, StackEvent::Delivered { .. }))
        .count();
    assert_eq!((received, delivered), (1, 1));
}
#[tokio::test(start_paused = true)]
async fn test_ttl_one_needs_a_local_listener() {
    let a = node(NODE_A);
    let result = a
        .stack
        .send(&on_off(true), app(unicast(NODE_B)).with_ttl(TTL::new(1)))
        .await;
    assert_eq!(result, Err(SendError::InvalidDestination));
    let result = a
        .stack
        .send(&on_off(true), app(unicast(NODE_B)).with_source_element(1))
        .await;
    assert_eq!(result, Err(SendError::InvalidSourceElement));
    assert_eq!(a.radio.count(), 0);
}
#[tokio::test(start_paused = true)]
async fn test_virtual_address_delivery() {
    let a = node(NODE_A);
    let mut b = node(NODE_B);
    let label = LabelUUID::from_hex("f4a002c7fb1e4ca0a469a021de0db875").unwrap();
    let virtual_address = Address::Virtual(crate::address::VirtualAddress::new(&label));
    b.stack.subscribe(virtual_address).await;
    a.stack
        .send(&on_off(true), app(virtual_address))
        .await
        .unwrap();
    relay(&a, &b).await;
    match b.events.recv().await.unwrap() {
        StackEvent::Received(message) => {
            assert_eq!(message.label, Some(label));
            assert_eq!(message.dst, virtual_address);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
#[tokio::test(start_paused = true)]
async fn test_proxy_filter_round_trip() {
    let mut a = node(NODE_A);
    let group = Address::Group(GroupAddress::new(0xC001));
    a.stack.add_to_proxy_filter(&[group]).await.unwrap();
    let sent = a.radio.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, PDUType::ProxyConfiguration);
    let (src, message) =
        proxy::decrypt_configuration(&sent[0].0, &network_keys(), IVIndex(IV_INDEX)).unwrap();
    assert_eq!(src, UnicastAddress::new(NODE_A));
    assert_eq!(message, ProxyConfigurationMessage::AddAddresses(vec![group]));

    let proxy_address = UnicastAddress::new(0x0100);
    let status = proxy::encrypt_configuration(
        &ProxyConfigurationMessage::FilterStatus {
            filter_type: FilterType::Inclusion,
            list_size: 1,
        },
        &network_keys(),
        IVIndex(IV_INDEX),
        SequenceNumber::new_masked(1),
        proxy_address,
    )
    .unwrap();
    a.stack
        .handle_incoming(&status, PDUType::ProxyConfiguration)
        .await
        .unwrap();
    match a.events.recv().await.unwrap() {
        StackEvent::ProxyFilterUpdated {
            filter_type,
            list_size,
        } => {
            assert_eq!(filter_type, FilterType::Inclusion);
            assert_eq!(list_size, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
    let filter = a.stack.proxy_filter().await;
    assert_eq!(filter.proxy(), Some(proxy_address));
    assert!(!filter.is_busy());
}
#[tokio::test(start_paused = true)]
async fn test_heartbeat_and_replay() {
    let mut a = node(NODE_A);
    let heartbeat = Heartbeat {
        init_ttl: 7,
        features: Features(Features::RELAY),
    };
    let pdu = network_pdu(
        0x0003,
        unicast(NODE_A),
        10,
        3,
        &lower::PDU::UnsegmentedControl(heartbeat.to_unsegmented().unwrap()),
    );
    a.stack.handle_incoming(&pdu, PDUType::Network).await.unwrap();
    match a.events.recv().await.unwrap() {
        StackEvent::HeartbeatReceived {
            src,
            init_ttl,
            hops,
            features,
            ..
        } => {
            assert_eq!(src, UnicastAddress::new(0x0003));
            assert_eq!(init_ttl, 7);
            assert_eq!(hops, 5);
            assert_eq!(features, Features(Features::RELAY));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        a.stack.handle_incoming(&pdu, PDUType::Network).await,
        Err(RecvError::Replay)
    );
    assert_eq!(
        a.stack.handle_incoming(&pdu, PDUType::MeshBeacon).await,
        Err(RecvError::UnsupportedPDUType(PDUType::MeshBeacon))
    );
    assert_eq!(
        a.stack.handle_incoming(&pdu[..8], PDUType::Network).await,
        Err(RecvError::MalformedNetworkPDU)
    );
}
#[tokio::test(start_paused = true)]
async fn test_sequence_numbers_persist() {
    let a = node(NODE_A);
    a.stack
        .send(&on_off(true), app(unicast(NODE_B)))
        .await
        .unwrap();
    a.stack
        .send(&on_off(false), app(unicast(NODE_B)))
        .await
        .unwrap();
    let sent = a.radio.take();
    let iv_state = IVIndexState::new(IVIndex(IV_INDEX));
    let net_keys = &materials(NODE_A).net_key_map;
    let seqs: Vec<u32> = sent
        .iter()
        .map(|(pdu, _)| {
            net::decode(pdu, net_keys, &iv_state)
                .unwrap()
                .pdu
                .header
                .seq
                .value()
        })
        .collect();
    assert_eq!(seqs, vec![0, 1]);
}
