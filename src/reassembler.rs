//! Transport Layer Reassembler.
use crate::control::{ControlOpcode, ControlPayload};
use crate::crypto::{MicSize, AID, AKF};
use crate::lower::{
    BlockAck, SegN, SegO, SegmentHeader, SegmentedAccessPDU, SegmentedControlPDU, SEQ_ZERO_MAX,
};
use crate::mesh::{IVIndex, SeqAuth, SequenceNumber};
use crate::upper::{EncryptedAppPayload, UpperAccessPDU, UpperPDU};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, thiserror::Error)]
pub enum ReassembleError {
    #[error("segment SegN differs from the first segment")]
    SegNMismatch,
    #[error("segment belongs to a different message")]
    KindMismatch,
    #[error("segment longer than the segment size")]
    DataTooLong,
    #[error("non-final segment shorter than the segment size")]
    ShortSegment,
    #[error("SegO past SegN")]
    SegmentOutOfBounds,
}

/// What kind of Upper Transport PDU is being reassembled.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum SegmentKind {
    Access { akf: AKF, aid: AID, szmic: bool },
    Control(ControlOpcode),
}
impl SegmentKind {
    #[must_use]
    pub const fn max_seg_len(self) -> usize {
        match self {
            SegmentKind::Access { .. } => SegmentedAccessPDU::max_seg_len(),
            SegmentKind::Control(_) => SegmentedControlPDU::max_seg_len(),
        }
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct ContextHeader {
    kind: SegmentKind,
    seg_n: SegN,
    block_ack: BlockAck,
}
impl ContextHeader {
    #[must_use]
    pub fn new(kind: SegmentKind, seg_n: SegN) -> Self {
        Self {
            kind,
            seg_n,
            block_ack: BlockAck::default(),
        }
    }
    #[must_use]
    pub fn all_acked(&self) -> bool {
        self.block_ack.all_acked(self.seg_n)
    }
    #[must_use]
    pub const fn kind(&self) -> SegmentKind {
        self.kind
    }
    #[must_use]
    pub const fn seg_n(&self) -> SegN {
        self.seg_n
    }
    #[must_use]
    pub fn seg_count(&self) -> usize {
        self.seg_n.seg_count()
    }
    #[must_use]
    pub const fn block_ack(&self) -> BlockAck {
        self.block_ack
    }
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.kind.max_seg_len() * self.seg_count()
    }
}
/// Positional storage for the segments of one message.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Context {
    storage: Vec<u8>,
    data_len: usize,
    header: ContextHeader,
}
impl Context {
    #[must_use]
    pub fn new(header: ContextHeader) -> Self {
        Self {
            storage: vec![0_u8; header.max_len()],
            data_len: 0,
            header,
        }
    }
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.header.all_acked()
    }
    #[must_use]
    pub const fn header(&self) -> &ContextHeader {
        &self.header
    }
    #[must_use]
    pub const fn block_ack(&self) -> BlockAck {
        self.header.block_ack
    }
    /// Stores one segment. Returns `false` for a duplicate (already stored) segment.
    pub fn insert_data(
        &mut self,
        seg_o: SegO,
        seg_n: SegN,
        data: &[u8],
    ) -> Result<bool, ReassembleError> {
        if seg_n != self.header.seg_n {
            return Err(ReassembleError::SegNMismatch);
        }
        let seg_o = u8::from(seg_o);
        if seg_o > u8::from(seg_n) {
            return Err(ReassembleError::SegmentOutOfBounds);
        }
        let max_seg_len = self.header.kind.max_seg_len();
        if data.len() > max_seg_len {
            return Err(ReassembleError::DataTooLong);
        }
        let is_last = seg_o == u8::from(seg_n);
        if !is_last && data.len() != max_seg_len {
            return Err(ReassembleError::ShortSegment);
        }
        if self.header.block_ack.get(seg_o) {
            return Ok(false);
        }
        let pos = usize::from(seg_o) * max_seg_len;
        self.storage[pos..pos + data.len()].copy_from_slice(data);
        self.header.block_ack.set(seg_o);
        if is_last {
            self.data_len = pos + data.len();
        }
        Ok(true)
    }
    /// Checks the segment belongs to this message and stores it.
    pub fn insert_access(&mut self, pdu: &SegmentedAccessPDU) -> Result<bool, ReassembleError> {
        let kind = SegmentKind::Access {
            akf: pdu.akf(),
            aid: pdu.aid(),
            szmic: pdu.szmic().0,
        };
        if kind != self.header.kind {
            return Err(ReassembleError::KindMismatch);
        }
        let header = pdu.header();
        self.insert_data(header.seg_o, header.seg_n, pdu.segment_data())
    }
    pub fn insert_control(&mut self, pdu: &SegmentedControlPDU) -> Result<bool, ReassembleError> {
        if SegmentKind::Control(pdu.opcode()) != self.header.kind {
            return Err(ReassembleError::KindMismatch);
        }
        let header = pdu.header();
        self.insert_data(header.seg_o, header.seg_n, pdu.segment_data())
    }
    /// The reassembled Upper Transport PDU once every segment is in.
    #[must_use]
    pub fn finish(&self) -> Option<UpperPDU> {
        if !self.is_ready() {
            return None;
        }
        let data = &self.storage[..self.data_len];
        Some(match self.header.kind {
            SegmentKind::Access { akf, aid, szmic } => UpperPDU::Access(UpperAccessPDU {
                akf,
                aid,
                payload: EncryptedAppPayload::from_bytes(data, MicSize::from(szmic))?,
            }),
            SegmentKind::Control(opcode) => UpperPDU::Control(ControlPayload {
                opcode,
                payload: data.to_vec(),
            }),
        })
    }
}
impl From<&SegmentedAccessPDU> for Context {
    fn from(pdu: &SegmentedAccessPDU) -> Self {
        Context::new(ContextHeader::new(
            SegmentKind::Access {
                akf: pdu.akf(),
                aid: pdu.aid(),
                szmic: pdu.szmic().0,
            },
            pdu.header().seg_n,
        ))
    }
}
impl From<&SegmentedControlPDU> for Context {
    fn from(pdu: &SegmentedControlPDU) -> Self {
        Context::new(ContextHeader::new(
            SegmentKind::Control(pdu.opcode()),
            pdu.header().seg_n,
        ))
    }
}
/// SeqAuth of the first segment of the message `header` belongs to, given the sequence number
/// `seq` the segment arrived with. `None` if SeqZero points before the start of the
/// sequence space.
#[must_use]
pub fn first_seq_auth(
    header: &SegmentHeader,
    seq: SequenceNumber,
    iv_index: IVIndex,
) -> Option<SeqAuth> {
    let seq = seq.value();
    let delta = (seq.wrapping_sub(u32::from(header.seq_zero.value()))) & u32::from(SEQ_ZERO_MAX);
    let first = seq.checked_sub(delta)?;
    Some(SeqAuth::new(SequenceNumber::new_masked(first), iv_index))
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MIC;
    use crate::lower::{SeqZero, PDU};
    use crate::segmenter::Segmenter;
    use rand::seq::SliceRandom;

    fn reassemble(len: usize, mic: MIC) {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        let upper = UpperPDU::Access(UpperAccessPDU {
            akf: AKF(true),
            aid: AID::new(0x11),
            payload: EncryptedAppPayload::new(payload, mic),
        });
        let segmenter = Segmenter::new(upper.clone(), SeqZero::new(0x1234)).unwrap();
        let mut segments: Vec<PDU> = segmenter.iter(BlockAck::all(segmenter.seg_n())).collect();
        segments.shuffle(&mut rand::thread_rng());
        let mut context: Option<Context> = None;
        for segment in &segments {
            let segment = match segment {
                PDU::SegmentedAccess(segment) => segment,
                other => panic!("unexpected {:?}", other),
            };
            let context = context.get_or_insert_with(|| Context::from(segment));
            assert_eq!(context.insert_access(segment), Ok(true));
            // Duplicates are idempotent.
            assert_eq!(context.insert_access(segment), Ok(false));
        }
        assert_eq!(context.unwrap().finish(), Some(upper));
    }
    #[test]
    fn test_permuted_round_trip_small_mic() {
        for len in 1..=380 {
            reassemble(len, MIC::Small(0xDEAD_BEEF));
        }
    }
    #[test]
    fn test_permuted_round_trip_big_mic() {
        for len in 1..=376 {
            reassemble(len, MIC::Big(0x0123_4567_89AB_CDEF));
        }
    }
    /// 2-byte opcode + 15 bytes of parameters, 21 bytes with the TransMIC, 2 segments.
    #[test]
    fn test_seventeen_byte_access_pdu() {
        let upper = UpperPDU::Access(UpperAccessPDU {
            akf: AKF(false),
            aid: AID::new(0),
            payload: EncryptedAppPayload::new(vec![0x5A; 17], MIC::Small(7)),
        });
        assert_eq!(upper.len(), 21);
        let segmenter = Segmenter::new(upper.clone(), SeqZero::new(3)).unwrap();
        assert_eq!(segmenter.seg_count(), 2);
        let mut context: Option<Context> = None;
        let pdus: Vec<PDU> = segmenter.iter(BlockAck::all(segmenter.seg_n())).collect();
        for pdu in pdus.iter().rev() {
            if let PDU::SegmentedAccess(segment) = pdu {
                let context = context.get_or_insert_with(|| Context::from(segment));
                context.insert_access(segment).unwrap();
            }
        }
        assert_eq!(context.unwrap().finish(), Some(upper));
    }
    #[test]
    fn test_rejected_segments() {
        let kind = SegmentKind::Access {
            akf: AKF(false),
            aid: AID::new(0),
            szmic: false,
        };
        let mut context = Context::new(ContextHeader::new(kind, SegN::new(2)));
        assert_eq!(
            context.insert_data(SegO::new(0), SegN::new(3), &[0; 12]),
            Err(ReassembleError::SegNMismatch)
        );
        assert_eq!(
            context.insert_data(SegO::new(3), SegN::new(2), &[0; 12]),
            Err(ReassembleError::SegmentOutOfBounds)
        );
        assert_eq!(
            context.insert_data(SegO::new(1), SegN::new(2), &[0; 11]),
            Err(ReassembleError::ShortSegment)
        );
        assert_eq!(context.insert_data(SegO::new(2), SegN::new(2), &[0; 3]), Ok(true));
        assert!(context.finish().is_none());
        assert_eq!(context.block_ack(), BlockAck::new(0b100));
    }
    #[test]
    fn test_control_reassembly() {
        let mut context = Context::new(ContextHeader::new(
            SegmentKind::Control(ControlOpcode::Heartbeat),
            SegN::new(1),
        ));
        context.insert_data(SegO::new(1), SegN::new(1), &[2, 2]).unwrap();
        context.insert_data(SegO::new(0), SegN::new(1), &[1; 8]).unwrap();
        match context.finish() {
            Some(UpperPDU::Control(control)) => {
                assert_eq!(control.opcode, ControlOpcode::Heartbeat);
                assert_eq!(control.payload.len(), 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    #[test]
    fn test_first_seq_auth() {
        let header = |seq_zero: u16| {
            SegmentHeader::new(false, SeqZero::new(seq_zero), SegO::new(1), SegN::new(1))
        };
        let iv = IVIndex(1);
        assert_eq!(
            first_seq_auth(&header(0x09AB), SequenceNumber::new_masked(0x3129AC), iv),
            Some(SeqAuth::new(SequenceNumber::new_masked(0x3129AB), iv))
        );
        // SeqZero wrapped around the 13 bit boundary.
        assert_eq!(
            first_seq_auth(&header(0x1FFF), SequenceNumber::new_masked(0x2001), iv),
            Some(SeqAuth::new(SequenceNumber::new_masked(0x1FFF), iv))
        );
        assert_eq!(
            first_seq_auth(&header(0x1FFF), SequenceNumber::new_masked(0x0001), iv),
            None
        );
    }
}
