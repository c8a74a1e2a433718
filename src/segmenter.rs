//! Splits Upper Transport PDUs into Lower Transport PDUs and tracks the acknowledgment state of
//! an outgoing segmented message.
use crate::address::{Address, UnicastAddress};
use crate::config::NetworkParameters;
use crate::control::Ack;
use crate::lower::{
    BlockAck, SegN, SegO, SegmentHeader, SegmentedAccessPDU, SegmentedControlPDU, SeqZero,
    UnsegmentedAccessPDU, UnsegmentedControlPDU, PDU,
};
use crate::mesh::TTL;
use crate::upper::UpperPDU;
use core::time::Duration;

pub struct Segmenter {
    upper_pdu: UpperPDU,
    bytes: Vec<u8>,
    seq_zero: SeqZero,
    seg_n: SegN,
}
impl Segmenter {
    /// `None` if `upper_pdu` needs more than 32 segments.
    #[must_use]
    pub fn new(upper_pdu: UpperPDU, seq_zero: SeqZero) -> Option<Self> {
        let seg_n = upper_pdu.seg_n()?;
        Some(Self {
            bytes: upper_pdu.to_bytes(),
            upper_pdu,
            seq_zero,
            seg_n,
        })
    }
    #[must_use]
    pub const fn seg_n(&self) -> SegN {
        self.seg_n
    }
    #[must_use]
    pub const fn seq_zero(&self) -> SeqZero {
        self.seq_zero
    }
    #[must_use]
    pub fn seg_count(&self) -> usize {
        self.seg_n.seg_count()
    }
    #[must_use]
    pub const fn upper_pdu(&self) -> &UpperPDU {
        &self.upper_pdu
    }
    /// Single Lower Transport PDU for PDUs small enough to skip segmentation.
    #[must_use]
    pub fn unsegmented(&self) -> Option<PDU> {
        if self.upper_pdu.should_segment() {
            return None;
        }
        match &self.upper_pdu {
            UpperPDU::Access(access) => Some(PDU::UnsegmentedAccess(UnsegmentedAccessPDU::new(
                access.akf,
                access.aid,
                &self.bytes,
            )?)),
            UpperPDU::Control(control) => Some(PDU::UnsegmentedControl(
                UnsegmentedControlPDU::new(control.opcode, &self.bytes)?,
            )),
        }
    }
    /// Segment number `seg_o`. `None` if `seg_o > seg_n`.
    #[must_use]
    pub fn segment(&self, seg_o: u8) -> Option<PDU> {
        if seg_o > u8::from(self.seg_n) {
            return None;
        }
        let seg_len = self.upper_pdu.segment_len();
        let start = usize::from(seg_o) * seg_len;
        let end = (start + seg_len).min(self.bytes.len());
        let data = self.bytes.get(start..end)?;
        let seg_o = SegO::new(seg_o);
        match &self.upper_pdu {
            UpperPDU::Access(access) => Some(PDU::SegmentedAccess(SegmentedAccessPDU::new(
                access.akf,
                access.aid,
                access.szmic(),
                self.seq_zero,
                seg_o,
                self.seg_n,
                data,
            )?)),
            UpperPDU::Control(control) => Some(PDU::SegmentedControl(SegmentedControlPDU::new(
                control.opcode,
                SegmentHeader::new(false, self.seq_zero, seg_o, self.seg_n),
                data,
            )?)),
        }
    }
    /// Iterates over every segment whose bit is set in `outstanding`.
    #[must_use]
    pub fn iter(&self, outstanding: BlockAck) -> SegmentIterator<'_> {
        SegmentIterator {
            outstanding,
            segmenter: self,
            seg_o: 0,
        }
    }
}
pub struct SegmentIterator<'a> {
    outstanding: BlockAck,
    segmenter: &'a Segmenter,
    seg_o: u8,
}
impl Iterator for SegmentIterator<'_> {
    type Item = PDU;

    fn next(&mut self) -> Option<Self::Item> {
        // Skip acked segments.
        while self.seg_o <= u8::from(self.segmenter.seg_n) {
            let seg_o = self.seg_o;
            self.seg_o += 1;
            if self.outstanding.get(seg_o) {
                return self.segmenter.segment(seg_o);
            }
        }
        None
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TransactionState {
    AwaitingAck,
    Complete,
    Busy,
    TimedOut,
    Cancelled,
}
impl TransactionState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, TransactionState::AwaitingAck)
    }
}
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AckOutcome {
    /// Not for this transaction (other SeqZero or source) or already finished.
    Ignored,
    /// Some segments are still outstanding. Resend `resend` now if it isn't empty.
    Progress { resend: BlockAck },
    Complete,
    Busy,
}
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TimerOutcome {
    Resend(BlockAck),
    TimedOut,
    Complete,
}
/// Acknowledgment and retransmission bookkeeping of one outgoing segmented message.
///
/// Unicast messages are retransmitted at most `unicast_retransmissions` times (and at most
/// `unicast_retransmissions_without_progress` times in a row without a new segment being
/// acked). Group and virtual destinations never ack: every segment is sent
/// `multicast_retransmissions + 1` times and the message then completes.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OutgoingTransaction {
    dst: Address,
    seq_zero: SeqZero,
    seg_n: SegN,
    outstanding: BlockAck,
    without_progress: u8,
    remaining: u8,
    remaining_without_progress: u8,
    interval: Duration,
    state: TransactionState,
}
impl OutgoingTransaction {
    #[must_use]
    pub fn new(
        dst: Address,
        seq_zero: SeqZero,
        seg_n: SegN,
        ttl: TTL,
        params: &NetworkParameters,
    ) -> Self {
        let (retransmissions, without_progress, interval) = if dst.is_unicast() {
            (
                params.unicast_retransmissions,
                params.unicast_retransmissions_without_progress,
                params.unicast_retransmission_interval(ttl),
            )
        } else {
            (
                params.multicast_retransmissions,
                params.multicast_retransmissions,
                params.multicast_retransmission_interval,
            )
        };
        Self {
            dst,
            seq_zero,
            seg_n,
            outstanding: BlockAck::all(seg_n),
            without_progress,
            remaining: retransmissions,
            remaining_without_progress: without_progress,
            interval,
            state: TransactionState::AwaitingAck,
        }
    }
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }
    #[must_use]
    pub const fn outstanding(&self) -> BlockAck {
        self.outstanding
    }
    #[must_use]
    pub const fn seq_zero(&self) -> SeqZero {
        self.seq_zero
    }
    #[must_use]
    pub const fn dst(&self) -> Address {
        self.dst
    }
    /// Delay between two retransmission rounds.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
    #[must_use]
    pub const fn expects_ack(&self) -> bool {
        self.dst.is_unicast()
    }
    pub fn on_ack(&mut self, src: UnicastAddress, ack: &Ack) -> AckOutcome {
        if self.state.is_finished() || !self.expects_ack() || ack.seq_zero != self.seq_zero {
            return AckOutcome::Ignored;
        }
        // A Friend may ack on behalf of its Low Power node.
        if !ack.obo && self.dst.unicast() != Some(src) {
            return AckOutcome::Ignored;
        }
        if ack.is_busy() {
            self.state = TransactionState::Busy;
            return AckOutcome::Busy;
        }
        if ack.block_ack.all_acked(self.seg_n) {
            self.outstanding = BlockAck::default();
            self.state = TransactionState::Complete;
            return AckOutcome::Complete;
        }
        let before = self.outstanding;
        self.outstanding.remove(ack.block_ack);
        if self.outstanding == before {
            return AckOutcome::Progress {
                resend: BlockAck::default(),
            };
        }
        self.remaining_without_progress = self.without_progress;
        if self.remaining == 0 {
            return AckOutcome::Progress {
                resend: BlockAck::default(),
            };
        }
        self.remaining -= 1;
        AckOutcome::Progress {
            resend: self.outstanding,
        }
    }
    /// Retransmission timer expired.
    pub fn on_timer(&mut self) -> TimerOutcome {
        if self.state.is_finished() {
            return TimerOutcome::TimedOut;
        }
        if !self.expects_ack() {
            if self.remaining == 0 {
                self.state = TransactionState::Complete;
                return TimerOutcome::Complete;
            }
            self.remaining -= 1;
            return TimerOutcome::Resend(self.outstanding);
        }
        if self.remaining == 0 || self.remaining_without_progress == 0 {
            self.state = TransactionState::TimedOut;
            return TimerOutcome::TimedOut;
        }
        self.remaining -= 1;
        self.remaining_without_progress -= 1;
        TimerOutcome::Resend(self.outstanding)
    }
    pub fn cancel(&mut self) {
        if !self.state.is_finished() {
            self.state = TransactionState::Cancelled;
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlPayload;
    use crate::control::ControlOpcode;
    use crate::crypto::{AID, AKF, MIC};
    use crate::upper::{EncryptedAppPayload, UpperAccessPDU};

    fn access_pdu(len: usize, mic: MIC) -> UpperPDU {
        UpperPDU::Access(UpperAccessPDU {
            akf: AKF(true),
            aid: AID::new(0x26),
            payload: EncryptedAppPayload::new((0..len).map(|i| i as u8).collect(), mic),
        })
    }
    fn ack(seq_zero: u16, block_ack: u32) -> Ack {
        Ack {
            obo: false,
            seq_zero: SeqZero::new(seq_zero),
            block_ack: BlockAck::new(block_ack),
        }
    }
    #[test]
    fn test_segment_counts() {
        let segmenter = Segmenter::new(access_pdu(20, MIC::Small(1)), SeqZero::new(5)).unwrap();
        assert_eq!(segmenter.seg_count(), 2);
        assert!(segmenter.unsegmented().is_none());
        let segments: Vec<PDU> = segmenter.iter(BlockAck::all(segmenter.seg_n())).collect();
        assert_eq!(segments.len(), 2);
        match &segments[1] {
            PDU::SegmentedAccess(segment) => {
                assert_eq!(segment.segment_data().len(), 12);
                assert_eq!(&segment.segment_data()[8..], &[0, 0, 0, 1]);
            }
            other => panic!("unexpected {:?}", other),
        }
        let segmenter = Segmenter::new(access_pdu(380, MIC::Small(1)), SeqZero::new(5)).unwrap();
        assert_eq!(segmenter.seg_count(), 32);
        assert!(Segmenter::new(access_pdu(381, MIC::Small(1)), SeqZero::new(5)).is_none());
    }
    #[test]
    fn test_unsegmented_and_big_mic() {
        let segmenter = Segmenter::new(access_pdu(11, MIC::Small(1)), SeqZero::new(5)).unwrap();
        assert!(matches!(
            segmenter.unsegmented(),
            Some(PDU::UnsegmentedAccess(_))
        ));
        let segmenter = Segmenter::new(access_pdu(4, MIC::Big(1)), SeqZero::new(5)).unwrap();
        assert!(segmenter.unsegmented().is_none());
        match segmenter.segment(0) {
            Some(PDU::SegmentedAccess(segment)) => assert!(segment.szmic().0),
            other => panic!("unexpected {:?}", other),
        }
    }
    #[test]
    fn test_control_segments() {
        let upper = UpperPDU::Control(ControlPayload {
            opcode: ControlOpcode::Heartbeat,
            payload: vec![0xAA; 17],
        });
        let segmenter = Segmenter::new(upper, SeqZero::new(1)).unwrap();
        assert_eq!(segmenter.seg_count(), 3);
        let lengths: Vec<usize> = segmenter
            .iter(BlockAck::all(segmenter.seg_n()))
            .map(|pdu| pdu.to_bytes().len() - 4)
            .collect();
        assert_eq!(lengths, vec![8, 8, 1]);
    }
    #[test]
    fn test_iter_skips_acked() {
        let segmenter = Segmenter::new(access_pdu(40, MIC::Small(1)), SeqZero::new(5)).unwrap();
        let offsets: Vec<u8> = segmenter
            .iter(BlockAck::new(0b1010))
            .filter_map(|pdu| pdu.segment_header().map(|h| u8::from(h.seg_o)))
            .collect();
        assert_eq!(offsets, vec![1, 3]);
    }
    #[test]
    fn test_retry_limit() {
        let params = NetworkParameters::default();
        let mut transaction = OutgoingTransaction::new(
            Address::from(0x0002),
            SeqZero::new(9),
            SegN::new(1),
            TTL::new(5),
            &params,
        );
        assert_eq!(transaction.interval(), Duration::from_millis(400));
        for _ in 0..3 {
            assert_eq!(transaction.on_timer(), TimerOutcome::Resend(BlockAck::new(0b11)));
        }
        assert_eq!(transaction.on_timer(), TimerOutcome::TimedOut);
        assert_eq!(transaction.state(), TransactionState::TimedOut);
    }
    #[test]
    fn test_progress_and_complete() {
        let params = NetworkParameters::default();
        let dst = UnicastAddress::new(0x0002);
        let mut transaction = OutgoingTransaction::new(
            dst.into(),
            SeqZero::new(9),
            SegN::new(2),
            TTL::new(5),
            &params,
        );
        assert_eq!(
            transaction.on_ack(UnicastAddress::new(0x0003), &ack(9, 0b001)),
            AckOutcome::Ignored
        );
        assert_eq!(transaction.on_ack(dst, &ack(8, 0b001)), AckOutcome::Ignored);
        assert_eq!(
            transaction.on_ack(dst, &ack(9, 0b001)),
            AckOutcome::Progress {
                resend: BlockAck::new(0b110)
            }
        );
        assert_eq!(
            transaction.on_ack(dst, &ack(9, 0b001)),
            AckOutcome::Progress {
                resend: BlockAck::default()
            }
        );
        assert_eq!(transaction.on_ack(dst, &ack(9, 0b111)), AckOutcome::Complete);
        assert_eq!(transaction.on_ack(dst, &ack(9, 0b111)), AckOutcome::Ignored);
    }
    #[test]
    fn test_progress_restores_without_progress_limit() {
        let params = NetworkParameters::default().with_unicast_retransmissions(8, 2);
        let dst = UnicastAddress::new(0x0002);
        let mut transaction = OutgoingTransaction::new(
            dst.into(),
            SeqZero::new(9),
            SegN::new(2),
            TTL::new(0),
            &params,
        );
        assert_eq!(transaction.on_timer(), TimerOutcome::Resend(BlockAck::new(0b111)));
        assert_eq!(
            transaction.on_ack(dst, &ack(9, 0b001)),
            AckOutcome::Progress {
                resend: BlockAck::new(0b110)
            }
        );
        let mut rounds = 0;
        while let TimerOutcome::Resend(outstanding) = transaction.on_timer() {
            assert_eq!(outstanding, BlockAck::new(0b110));
            rounds += 1;
        }
        assert_eq!(rounds, 2);
        assert_eq!(transaction.state(), TransactionState::TimedOut);
    }
    #[test]
    fn test_busy_and_cancel() {
        let params = NetworkParameters::default();
        let dst = UnicastAddress::new(0x0002);
        let mut transaction = OutgoingTransaction::new(
            dst.into(),
            SeqZero::new(9),
            SegN::new(2),
            TTL::new(0),
            &params,
        );
        assert_eq!(transaction.interval(), Duration::from_millis(200));
        assert_eq!(transaction.on_ack(dst, &ack(9, 0)), AckOutcome::Busy);
        assert_eq!(transaction.state(), TransactionState::Busy);

        let mut transaction = OutgoingTransaction::new(
            dst.into(),
            SeqZero::new(9),
            SegN::new(2),
            TTL::new(0),
            &params,
        );
        transaction.cancel();
        assert_eq!(transaction.state(), TransactionState::Cancelled);
        assert_eq!(transaction.on_ack(dst, &ack(9, 0b111)), AckOutcome::Ignored);
    }
    #[test]
    fn test_multicast_completes_without_ack() {
        let params = NetworkParameters::default();
        let mut transaction = OutgoingTransaction::new(
            Address::from(0xC000),
            SeqZero::new(9),
            SegN::new(1),
            TTL::new(5),
            &params,
        );
        assert!(!transaction.expects_ack());
        assert_eq!(transaction.interval(), Duration::from_millis(250));
        for _ in 0..3 {
            assert!(matches!(transaction.on_timer(), TimerOutcome::Resend(_)));
        }
        assert_eq!(transaction.on_timer(), TimerOutcome::Complete);
    }
}
