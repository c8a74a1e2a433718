//! Lower Transport Layer PDUs.
//!
//! | CTL | SEG | Format              |
//! | --- | --- | ------------------- |
//! |  0  |  0  | Unsegmented Access  |
//! |  0  |  1  | Segmented Access    |
//! |  1  |  0  | Unsegmented Control |
//! |  1  |  1  | Segmented Control   |
use crate::control::ControlOpcode;
use crate::crypto::{AID, AKF};
use crate::mesh::{SequenceNumber, CTL, U24};
use core::fmt::{Display, Error, Formatter};

#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct SZMIC(pub bool);
impl From<SZMIC> for bool {
    fn from(s: SZMIC) -> Self {
        s.0
    }
}

pub const SEQ_ZERO_MAX: u16 = (1 << 13) - 1;
/// 13 Bits SeqZero. Lowest 13 bits of the sequence number of the first segment.
#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct SeqZero(u16);
impl SeqZero {
    /// # Panics
    /// Panics if `v > SEQ_ZERO_MAX`.
    #[must_use]
    pub fn new(v: u16) -> Self {
        assert!(v <= SEQ_ZERO_MAX, "seq_zero {} bigger than 13 bits", v);
        Self(v)
    }
    #[must_use]
    pub const fn new_masked(v: u16) -> Self {
        Self(v & SEQ_ZERO_MAX)
    }
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}
impl From<SequenceNumber> for SeqZero {
    fn from(seq: SequenceNumber) -> Self {
        SeqZero::new_masked(seq.value() as u16)
    }
}
impl Display for SeqZero {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "SeqZero({})", self.0)
    }
}

pub const SEG_MAX: u8 = 0x1F;
pub const MAX_SEGMENTS: usize = SEG_MAX as usize + 1;

/// 5 bit SegO (Segment Offset number)
#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct SegO(u8);
impl SegO {
    /// # Panics
    /// Panics if `v > SEG_MAX`.
    #[must_use]
    pub fn new(v: u8) -> Self {
        assert!(v <= SEG_MAX);
        Self(v)
    }
    #[must_use]
    pub const fn new_masked(v: u8) -> Self {
        Self(v & SEG_MAX)
    }
}
impl From<SegO> for u8 {
    fn from(s: SegO) -> Self {
        s.0
    }
}
/// 5 bit SegN (Last Segment number)
#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct SegN(u8);
impl SegN {
    /// # Panics
    /// Panics if `v > SEG_MAX`.
    #[must_use]
    pub fn new(v: u8) -> Self {
        assert!(v <= SEG_MAX);
        Self(v)
    }
    #[must_use]
    pub const fn new_masked(v: u8) -> Self {
        Self(v & SEG_MAX)
    }
    #[must_use]
    pub const fn seg_count(self) -> usize {
        self.0 as usize + 1
    }
}
impl From<SegN> for u8 {
    fn from(s: SegN) -> Self {
        s.0
    }
}
/// One bit per segment. Bit `n` set means segment `SegO == n` was received.
#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct BlockAck(u32);
impl BlockAck {
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }
    /// `BlockAck` with the bits of every segment `0..=seg_n` set.
    #[must_use]
    pub const fn all(seg_n: SegN) -> Self {
        if seg_n.0 >= 31 {
            Self(u32::MAX)
        } else {
            Self((1_u32 << (seg_n.0 + 1)) - 1)
        }
    }
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
    /// Sets the `bit` bit to 1. Does nothing if bit >= 32
    pub fn set(&mut self, bit: u8) {
        debug_assert!(bit < 32, "{} index overflow into u32", bit);
        if bit >= 32 {
            return;
        }
        (self.0) |= 1_u32 << u32::from(bit);
    }
    /// Returns the bit status (1 or 0) of the `bit` bit. Returns `False` for bit >= 32
    #[must_use]
    pub fn get(self, bit: u8) -> bool {
        if bit >= 32 {
            false
        } else {
            (self.0 & (1_u32 << u32::from(bit))) != 0
        }
    }
    /// Returns if the block ack (up to `seg_n` bits) is all 1s. False if otherwise
    #[must_use]
    pub fn all_acked(self, seg_n: SegN) -> bool {
        let all = Self::all(seg_n).0;
        self.0 & all == all
    }
    /// Clears every bit set in `other`.
    pub fn remove(&mut self, other: BlockAck) {
        self.0 &= !other.0;
    }
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
    pub const fn max_len() -> usize {
        32
    }
}
#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct SEG(bool);
impl SEG {
    #[must_use]
    pub const fn new_upper_masked(v: u8) -> SEG {
        SEG(v & 0x80 != 0)
    }
}
impl From<SEG> for bool {
    fn from(s: SEG) -> Self {
        s.0
    }
}
impl From<bool> for SEG {
    fn from(b: bool) -> Self {
        SEG(b)
    }
}
/// The 3 octets following the first octet of a segmented PDU.
/// | flag (1) | SeqZero (13) | SegO (5) | SegN (5) |
/// `flag` is SZMIC for access segments and RFU (0) for control segments.
#[derive(Copy, Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct SegmentHeader {
    pub flag: bool,
    pub seq_zero: SeqZero,
    pub seg_o: SegO,
    pub seg_n: SegN,
}
impl SegmentHeader {
    #[must_use]
    pub fn new(flag: bool, seq_zero: SeqZero, seg_o: SegO, seg_n: SegN) -> Self {
        Self {
            flag,
            seq_zero,
            seg_o,
            seg_n,
        }
    }
    #[must_use]
    pub fn pack_into_u24(self) -> U24 {
        U24::new_masked(
            (u32::from(self.flag) << 23)
                | (u32::from(self.seq_zero.0) << 10)
                | (u32::from(self.seg_o.0) << 5)
                | u32::from(self.seg_n.0),
        )
    }
    #[must_use]
    pub fn unpack_from_u24(v: U24) -> Self {
        let v = v.value();
        Self {
            flag: v & 0x0080_0000 != 0,
            seq_zero: SeqZero::new_masked((v >> 10) as u16),
            seg_o: SegO::new_masked((v >> 5) as u8),
            seg_n: SegN::new_masked(v as u8),
        }
    }
    fn to_bytes(self) -> [u8; 3] {
        let b = self.pack_into_u24().value().to_be_bytes();
        [b[1], b[2], b[3]]
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        Self::unpack_from_u24(U24::new_masked(u32::from_be_bytes([
            0, bytes[0], bytes[1], bytes[2],
        ])))
    }
}
const UNSEGMENTED_ACCESS_PDU_LEN: usize = 15;
/// Smallest Upper Transport Access PDU: 1 byte of payload plus a 32-bit TransMIC.
const MIN_UPPER_ACCESS_PDU_LEN: usize = 5;
/// Unsegmented Access PDU. `upper_pdu` is the encrypted access payload followed by a 32-bit
/// TransMIC.
#[derive(Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct UnsegmentedAccessPDU {
    akf: AKF,
    aid: AID,
    upper_pdu: Vec<u8>,
}
impl UnsegmentedAccessPDU {
    /// Returns `None` if `upper_pdu` is shorter than 5 or longer than 15 bytes.
    #[must_use]
    pub fn new(akf: AKF, aid: AID, upper_pdu: &[u8]) -> Option<UnsegmentedAccessPDU> {
        if !(MIN_UPPER_ACCESS_PDU_LEN..=UNSEGMENTED_ACCESS_PDU_LEN).contains(&upper_pdu.len()) {
            return None;
        }
        Some(UnsegmentedAccessPDU {
            akf,
            aid,
            upper_pdu: upper_pdu.to_vec(),
        })
    }
    #[must_use]
    pub const fn akf(&self) -> AKF {
        self.akf
    }
    #[must_use]
    pub const fn aid(&self) -> AID {
        self.aid
    }
    #[must_use]
    pub fn upper_pdu(&self) -> &[u8] {
        &self.upper_pdu
    }
    #[must_use]
    pub const fn max_upper_len() -> usize {
        UNSEGMENTED_ACCESS_PDU_LEN
    }
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.upper_pdu.len());
        out.push((u8::from(self.akf.0) << 6) | self.aid.value());
        out.extend_from_slice(&self.upper_pdu);
        out
    }
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&first, rest) = bytes.split_first()?;
        if SEG::new_upper_masked(first).0 {
            // SEG is set (1) so it is a segmented message
            None
        } else {
            Self::new(AKF(first & 0x40 != 0), AID::new_masked(first), rest)
        }
    }
}
pub const SEGMENTED_ACCESS_SEG_LEN: usize = 12;
#[derive(Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct SegmentedAccessPDU {
    akf: AKF,
    aid: AID,
    segment_header: SegmentHeader,
    segment: Vec<u8>,
}

impl SegmentedAccessPDU {
    /// Returns `None` if `data` is empty, longer than 12 bytes or `seg_o > seg_n`.
    #[must_use]
    pub fn new(
        akf: AKF,
        aid: AID,
        sz_mic: SZMIC,
        seq_zero: SeqZero,
        seg_o: SegO,
        seg_n: SegN,
        data: &[u8],
    ) -> Option<Self> {
        if data.is_empty() || data.len() > SEGMENTED_ACCESS_SEG_LEN || seg_o.0 > seg_n.0 {
            return None;
        }
        Some(Self {
            akf,
            aid,
            segment_header: SegmentHeader::new(sz_mic.0, seq_zero, seg_o, seg_n),
            segment: data.to_vec(),
        })
    }
    #[must_use]
    pub const fn akf(&self) -> AKF {
        self.akf
    }
    #[must_use]
    pub const fn aid(&self) -> AID {
        self.aid
    }
    #[must_use]
    pub const fn szmic(&self) -> SZMIC {
        SZMIC(self.segment_header.flag)
    }
    #[must_use]
    pub const fn header(&self) -> &SegmentHeader {
        &self.segment_header
    }
    #[must_use]
    pub fn segment_data(&self) -> &[u8] {
        &self.segment
    }
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.segment.len());
        out.push(0x80 | (u8::from(self.akf.0) << 6) | self.aid.value());
        out.extend_from_slice(&self.segment_header.to_bytes());
        out.extend_from_slice(&self.segment);
        out
    }
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 5 || !SEG::new_upper_masked(bytes[0]).0 {
            return None;
        }
        let header = SegmentHeader::from_bytes(&bytes[1..4]);
        Self::new(
            AKF(bytes[0] & 0x40 != 0),
            AID::new_masked(bytes[0]),
            SZMIC(header.flag),
            header.seq_zero,
            header.seg_o,
            header.seg_n,
            &bytes[4..],
        )
    }
    pub const fn max_seg_len() -> usize {
        SEGMENTED_ACCESS_SEG_LEN
    }
}

const UNSEGMENTED_CONTROL_PDU_LEN: usize = 11;
#[derive(Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct UnsegmentedControlPDU {
    opcode: ControlOpcode,
    parameters: Vec<u8>,
}
impl UnsegmentedControlPDU {
    /// Returns `None` if `parameters` is longer than 11 bytes.
    #[must_use]
    pub fn new(opcode: ControlOpcode, parameters: &[u8]) -> Option<UnsegmentedControlPDU> {
        if parameters.len() > UNSEGMENTED_CONTROL_PDU_LEN {
            None
        } else {
            Some(UnsegmentedControlPDU {
                opcode,
                parameters: parameters.to_vec(),
            })
        }
    }
    #[must_use]
    pub const fn opcode(&self) -> ControlOpcode {
        self.opcode
    }
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.parameters
    }
    #[must_use]
    pub const fn max_parameters_size() -> usize {
        UNSEGMENTED_CONTROL_PDU_LEN // 0-88 Bits
    }
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.parameters.len());
        out.push(u8::from(self.opcode));
        out.extend_from_slice(&self.parameters);
        out
    }
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&first, rest) = bytes.split_first()?;
        if SEG::new_upper_masked(first).0 {
            return None;
        }
        Self::new(ControlOpcode::new(first & 0x7F)?, rest)
    }
}
/// Segmented Control PDU Lengths
/// | # Packets  | PDU Size |
/// |      1     |     8    |
/// |      2     |    16    |
/// |      n     |    n*8   |
/// |     32     |    256   |
pub const SEGMENTED_CONTROL_SEG_LEN: usize = 8;
#[derive(Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct SegmentedControlPDU {
    opcode: ControlOpcode,
    segment_header: SegmentHeader,
    segment: Vec<u8>,
}
impl SegmentedControlPDU {
    /// Returns `None` if `data` is empty, longer than 8 bytes or the header has `seg_o > seg_n`.
    #[must_use]
    pub fn new(
        opcode: ControlOpcode,
        header: SegmentHeader,
        data: &[u8],
    ) -> Option<SegmentedControlPDU> {
        if data.is_empty() || data.len() > SEGMENTED_CONTROL_SEG_LEN || header.seg_o.0 > header.seg_n.0
        {
            return None;
        }
        Some(SegmentedControlPDU {
            opcode,
            segment_header: SegmentHeader { flag: false, ..header },
            segment: data.to_vec(),
        })
    }
    #[must_use]
    pub fn segment_data(&self) -> &[u8] {
        &self.segment
    }
    #[must_use]
    pub const fn opcode(&self) -> ControlOpcode {
        self.opcode
    }
    #[must_use]
    pub const fn header(&self) -> &SegmentHeader {
        &self.segment_header
    }
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.segment.len());
        out.push(0x80 | u8::from(self.opcode));
        out.extend_from_slice(&self.segment_header.to_bytes());
        out.extend_from_slice(&self.segment);
        out
    }
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 5 || !SEG::new_upper_masked(bytes[0]).0 {
            return None;
        }
        Self::new(
            ControlOpcode::new(bytes[0] & 0x7F)?,
            SegmentHeader::from_bytes(&bytes[1..4]),
            &bytes[4..],
        )
    }
    pub const fn max_seg_len() -> usize {
        SEGMENTED_CONTROL_SEG_LEN
    }
}

#[derive(Clone, Hash, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub enum PDU {
    UnsegmentedAccess(UnsegmentedAccessPDU),
    SegmentedAccess(SegmentedAccessPDU),
    UnsegmentedControl(UnsegmentedControlPDU),
    SegmentedControl(SegmentedControlPDU),
}
impl PDU {
    #[must_use]
    pub fn is_seg(&self) -> bool {
        match self {
            PDU::UnsegmentedAccess(_) | PDU::UnsegmentedControl(_) => false,
            PDU::SegmentedAccess(_) | PDU::SegmentedControl(_) => true,
        }
    }
    #[must_use]
    pub fn is_control(&self) -> bool {
        match self {
            PDU::UnsegmentedAccess(_) | PDU::SegmentedAccess(_) => false,
            PDU::UnsegmentedControl(_) | PDU::SegmentedControl(_) => true,
        }
    }
    #[must_use]
    pub fn ctl(&self) -> CTL {
        CTL(self.is_control())
    }
    #[must_use]
    pub fn segment_header(&self) -> Option<&SegmentHeader> {
        match self {
            PDU::SegmentedAccess(p) => Some(p.header()),
            PDU::SegmentedControl(p) => Some(p.header()),
            _ => None,
        }
    }
    /// Number of bytes required to hold any serialized `Lower::PDU` in a byte buffer.
    pub const fn max_len() -> usize {
        16
    }
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PDU::UnsegmentedAccess(p) => p.to_bytes(),
            PDU::SegmentedAccess(p) => p.to_bytes(),
            PDU::UnsegmentedControl(p) => p.to_bytes(),
            PDU::SegmentedControl(p) => p.to_bytes(),
        }
    }
    #[must_use]
    pub fn from_bytes(bytes: &[u8], ctl: CTL) -> Option<Self> {
        let seg = SEG::new_upper_masked(*bytes.first()?).0;
        Some(match (bool::from(ctl), seg) {
            (true, true) => PDU::SegmentedControl(SegmentedControlPDU::from_bytes(bytes)?),
            (true, false) => PDU::UnsegmentedControl(UnsegmentedControlPDU::from_bytes(bytes)?),
            (false, false) => PDU::UnsegmentedAccess(UnsegmentedAccessPDU::from_bytes(bytes)?),
            (false, true) => PDU::SegmentedAccess(SegmentedAccessPDU::from_bytes(bytes)?),
        })
    }
}
