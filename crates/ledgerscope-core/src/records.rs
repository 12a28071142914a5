//! Zero-copy views over the binary record formats.
//!
//! Views are constructed from a byte slice whose length is checked once at
//! construction; field accessors then read fixed offsets inside that window.
//! Callers never see raw offsets.

use crate::address::AddressType;
use crate::constants::{BLOCK_RECORD_SIZE, INOUT_SIZE, TX_HEADER_SIZE, VALUE_BITS, VALUE_MASK};
use crate::error::StoreError;
use crate::types::Hash256;

// --- Little-endian field readers ---

#[inline]
pub fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

#[inline]
pub fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

#[inline]
pub fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(buf)
}

// --- Block record ---

/// Owned block header, used when appending to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawBlock {
    pub hash: Hash256,
    pub coinbase_offset: u64,
    pub first_tx_index: u32,
    pub tx_count: u32,
    pub input_count: u32,
    pub output_count: u32,
    pub height: u32,
    pub version: i32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub size: u32,
    pub base_size: u32,
}

impl RawBlock {
    /// One past the last transaction number in this block.
    pub fn end_tx_index(&self) -> u32 {
        self.first_tx_index + self.tx_count
    }

    pub fn encode(&self) -> [u8; BLOCK_RECORD_SIZE] {
        let mut out = [0u8; BLOCK_RECORD_SIZE];
        out[0..32].copy_from_slice(&self.hash.0);
        out[32..40].copy_from_slice(&self.coinbase_offset.to_le_bytes());
        let words = [
            self.first_tx_index,
            self.tx_count,
            self.input_count,
            self.output_count,
            self.height,
            self.version as u32,
            self.timestamp,
            self.bits,
            self.nonce,
            self.size,
            self.base_size,
        ];
        for (i, w) in words.iter().enumerate() {
            let at = 40 + i * 4;
            out[at..at + 4].copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}

/// Read-only view of one 88-byte block record.
#[derive(Clone, Copy)]
pub struct BlockRecord<'a> {
    bytes: &'a [u8],
}

impl<'a> BlockRecord<'a> {
    /// Wrap a slice holding exactly one block record.
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        (bytes.len() == BLOCK_RECORD_SIZE).then_some(Self { bytes })
    }

    pub fn hash(&self) -> Hash256 {
        let mut h = [0u8; 32];
        h.copy_from_slice(&self.bytes[0..32]);
        Hash256(h)
    }

    pub fn coinbase_offset(&self) -> u64 {
        le_u64(self.bytes, 32)
    }

    pub fn first_tx_index(&self) -> u32 {
        le_u32(self.bytes, 40)
    }

    pub fn tx_count(&self) -> u32 {
        le_u32(self.bytes, 44)
    }

    pub fn input_count(&self) -> u32 {
        le_u32(self.bytes, 48)
    }

    pub fn output_count(&self) -> u32 {
        le_u32(self.bytes, 52)
    }

    pub fn height(&self) -> u32 {
        le_u32(self.bytes, 56)
    }

    pub fn version(&self) -> i32 {
        le_u32(self.bytes, 60) as i32
    }

    pub fn timestamp(&self) -> u32 {
        le_u32(self.bytes, 64)
    }

    pub fn bits(&self) -> u32 {
        le_u32(self.bytes, 68)
    }

    pub fn nonce(&self) -> u32 {
        le_u32(self.bytes, 72)
    }

    /// Serialized size including witness data.
    pub fn size(&self) -> u32 {
        le_u32(self.bytes, 76)
    }

    /// Serialized size without witness data.
    pub fn base_size(&self) -> u32 {
        le_u32(self.bytes, 80)
    }

    /// One past the last transaction number in this block.
    pub fn end_tx_index(&self) -> u32 {
        self.first_tx_index() + self.tx_count()
    }

    pub fn to_raw(&self) -> RawBlock {
        RawBlock {
            hash: self.hash(),
            coinbase_offset: self.coinbase_offset(),
            first_tx_index: self.first_tx_index(),
            tx_count: self.tx_count(),
            input_count: self.input_count(),
            output_count: self.output_count(),
            height: self.height(),
            version: self.version(),
            timestamp: self.timestamp(),
            bits: self.bits(),
            nonce: self.nonce(),
            size: self.size(),
            base_size: self.base_size(),
        }
    }
}

impl std::fmt::Debug for BlockRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_raw().fmt(f)
    }
}

// --- In/out entries ---

/// One packed input or output entry.
///
/// For an input `linked_tx_num` is the spent transaction; for an output it
/// is the spending transaction, with 0 meaning unspent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inout {
    pub linked_tx_num: u32,
    pub script_num: u32,
    other: u64,
}

impl Inout {
    /// Pack an entry. Values wider than 60 bits are truncated to the mask.
    pub fn new(linked_tx_num: u32, script_num: u32, address_type: AddressType, value: u64) -> Self {
        let other = (u64::from(address_type.tag()) << VALUE_BITS) | (value & VALUE_MASK);
        Self { linked_tx_num, script_num, other }
    }

    fn decode(b: &[u8]) -> Self {
        Self {
            linked_tx_num: le_u32(b, 0),
            script_num: le_u32(b, 4),
            other: le_u64(b, 8),
        }
    }

    pub fn encode(&self) -> [u8; INOUT_SIZE] {
        let mut out = [0u8; INOUT_SIZE];
        out[0..4].copy_from_slice(&self.linked_tx_num.to_le_bytes());
        out[4..8].copy_from_slice(&self.script_num.to_le_bytes());
        out[8..16].copy_from_slice(&self.other.to_le_bytes());
        out
    }

    pub fn value(&self) -> u64 {
        self.other & VALUE_MASK
    }

    pub fn type_tag(&self) -> u8 {
        (self.other >> VALUE_BITS) as u8
    }

    /// Decoded address type, `None` for a tag outside the known set.
    pub fn address_type(&self) -> Option<AddressType> {
        AddressType::from_tag(self.type_tag())
    }
}

// --- Transaction record ---

/// Owned transaction header, used when appending to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawTransaction {
    pub total_size: u32,
    pub base_size: u32,
    pub locktime: u32,
    pub input_count: u16,
    pub output_count: u16,
}

impl RawTransaction {
    pub fn encode(&self) -> [u8; TX_HEADER_SIZE] {
        let mut out = [0u8; TX_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.total_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.base_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.locktime.to_le_bytes());
        out[12..14].copy_from_slice(&self.input_count.to_le_bytes());
        out[14..16].copy_from_slice(&self.output_count.to_le_bytes());
        out
    }

    /// Full record length: header plus every in/out entry.
    pub fn record_len(&self) -> usize {
        record_len(self.input_count, self.output_count)
    }
}

/// Byte length of a transaction record with the given entry counts.
pub fn record_len(input_count: u16, output_count: u16) -> usize {
    TX_HEADER_SIZE + (usize::from(input_count) + usize::from(output_count)) * INOUT_SIZE
}

/// Read-only view of one variable-length transaction record.
#[derive(Clone, Copy)]
pub struct TxRecord<'a> {
    bytes: &'a [u8],
}

impl<'a> TxRecord<'a> {
    /// Parse the record starting at the front of `tail`, which is the mapped
    /// region from byte `offset` to its end. The returned view covers exactly
    /// the record.
    pub fn parse(tail: &'a [u8], offset: u64) -> Result<Self, StoreError> {
        if tail.len() < TX_HEADER_SIZE {
            return Err(StoreError::TruncatedRecord {
                offset,
                needed: TX_HEADER_SIZE as u64,
                available: tail.len() as u64,
            });
        }
        let len = record_len(le_u16(tail, 12), le_u16(tail, 14));
        if tail.len() < len {
            return Err(StoreError::TruncatedRecord {
                offset,
                needed: len as u64,
                available: tail.len() as u64,
            });
        }
        let record = Self { bytes: &tail[..len] };
        let entries = usize::from(record.input_count()) + usize::from(record.output_count());
        if let Some(slot) = (0..entries).find(|slot| record.entry(*slot).address_type().is_none()) {
            return Err(StoreError::CorruptRecord {
                offset,
                reason: format!("entry {slot} has unknown address type {}", record.entry(slot).type_tag()),
            });
        }
        Ok(record)
    }

    pub fn total_size(&self) -> u32 {
        le_u32(self.bytes, 0)
    }

    pub fn base_size(&self) -> u32 {
        le_u32(self.bytes, 4)
    }

    pub fn locktime(&self) -> u32 {
        le_u32(self.bytes, 8)
    }

    pub fn input_count(&self) -> u16 {
        le_u16(self.bytes, 12)
    }

    pub fn output_count(&self) -> u16 {
        le_u16(self.bytes, 14)
    }

    /// Length of this record; the next record starts this many bytes later.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> RawTransaction {
        RawTransaction {
            total_size: self.total_size(),
            base_size: self.base_size(),
            locktime: self.locktime(),
            input_count: self.input_count(),
            output_count: self.output_count(),
        }
    }

    fn entry(&self, slot: usize) -> Inout {
        let at = TX_HEADER_SIZE + slot * INOUT_SIZE;
        Inout::decode(&self.bytes[at..at + INOUT_SIZE])
    }

    pub fn input(&self, index: u16) -> Option<Inout> {
        (index < self.input_count()).then(|| self.entry(usize::from(index)))
    }

    pub fn output(&self, index: u16) -> Option<Inout> {
        (index < self.output_count())
            .then(|| self.entry(usize::from(self.input_count()) + usize::from(index)))
    }
}

impl std::fmt::Debug for TxRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.header().fmt(f)
    }
}

/// Serialize a full transaction record. Fails when either entry count
/// exceeds the header's `u16` fields.
pub fn encode_tx(
    locktime: u32,
    total_size: u32,
    base_size: u32,
    inputs: &[Inout],
    outputs: &[Inout],
) -> Result<Vec<u8>, StoreError> {
    let header = RawTransaction {
        total_size,
        base_size,
        locktime,
        input_count: u16::try_from(inputs.len()).map_err(|_| StoreError::overflow("input count", inputs.len()))?,
        output_count: u16::try_from(outputs.len()).map_err(|_| StoreError::overflow("output count", outputs.len()))?,
    };
    let mut out = Vec::with_capacity(header.record_len());
    out.extend_from_slice(&header.encode());
    for entry in inputs.iter().chain(outputs) {
        out.extend_from_slice(&entry.encode());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> RawBlock {
        RawBlock {
            hash: Hash256([0x5a; 32]),
            coinbase_offset: 1234,
            first_tx_index: 10,
            tx_count: 3,
            input_count: 4,
            output_count: 6,
            height: 2,
            version: -1,
            timestamp: 1_500_000_000,
            bits: 0x1d00ffff,
            nonce: 42,
            size: 900,
            base_size: 700,
        }
    }

    #[test]
    fn block_record_field_offsets() {
        let raw = sample_block();
        let bytes = raw.encode();
        assert_eq!(&bytes[84..88], &[0, 0, 0, 0]);
        let view = BlockRecord::new(&bytes).unwrap();
        assert_eq!(view.to_raw(), raw);
        assert_eq!(view.end_tx_index(), 13);
        assert_eq!(view.version(), -1);
    }

    #[test]
    fn block_record_rejects_wrong_length() {
        assert!(BlockRecord::new(&[0u8; 87]).is_none());
    }

    #[test]
    fn inout_packs_type_in_top_bits() {
        let e = Inout::new(5, 9, AddressType::WitnessScriptHash, 50_000);
        assert_eq!(e.value(), 50_000);
        assert_eq!(e.address_type(), Some(AddressType::WitnessScriptHash));
        let bytes = e.encode();
        assert_eq!(bytes[15] >> 4, 8);
        assert_eq!(Inout::decode(&bytes), e);
    }

    #[test]
    fn inout_value_is_masked() {
        let e = Inout::new(0, 1, AddressType::Pubkey, u64::MAX);
        assert_eq!(e.value(), VALUE_MASK);
        assert_eq!(e.address_type(), Some(AddressType::Pubkey));
    }

    #[test]
    fn tx_record_navigation() {
        let ins = [Inout::new(1, 1, AddressType::PubkeyHash, 100)];
        let outs = [
            Inout::new(0, 2, AddressType::PubkeyHash, 60),
            Inout::new(0, 3, AddressType::NullData, 0),
        ];
        let mut bytes = encode_tx(7, 250, 200, &ins, &outs).unwrap();
        bytes.extend_from_slice(&[0xff; 5]);

        let rec = TxRecord::parse(&bytes, 0).unwrap();
        assert_eq!(rec.len(), TX_HEADER_SIZE + 3 * INOUT_SIZE);
        assert_eq!(rec.locktime(), 7);
        assert_eq!(rec.input(0).unwrap().value(), 100);
        assert_eq!(rec.output(1).unwrap().script_num, 3);
        assert!(rec.output(2).is_none());
        assert!(rec.input(1).is_none());
    }

    #[test]
    fn unknown_type_tag_is_corrupt() {
        let mut bytes = encode_tx(0, 0, 0, &[], &[Inout::new(0, 1, AddressType::Pubkey, 5)]).unwrap();
        bytes[TX_HEADER_SIZE + 15] = 0xf0;
        assert!(matches!(
            TxRecord::parse(&bytes, 0),
            Err(StoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn truncated_record_is_reported() {
        let ins = [Inout::new(1, 1, AddressType::PubkeyHash, 100)];
        let bytes = encode_tx(0, 0, 0, &ins, &ins).unwrap();
        let cut = &bytes[..bytes.len() - 1];
        match TxRecord::parse(cut, 64) {
            Err(StoreError::TruncatedRecord { offset, needed, .. }) => {
                assert_eq!(offset, 64);
                assert_eq!(needed, bytes.len() as u64);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(TxRecord::parse(&bytes[..10], 0).is_err());
    }

    #[test]
    fn oversized_entry_lists_are_rejected() {
        let outs = vec![Inout::new(0, 1, AddressType::Pubkey, 1); usize::from(u16::MAX) + 1];
        match encode_tx(0, 0, 0, &[], &outs) {
            Err(StoreError::FieldOverflow { field, value }) => {
                assert_eq!(field, "output count");
                assert_eq!(value, 65_536);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        assert!(encode_tx(0, 0, 0, &[], &outs[..usize::from(u16::MAX)]).is_ok());
    }

    #[test]
    fn raw_block_end_matches_view() {
        let raw = RawBlock {
            first_tx_index: 40,
            tx_count: 7,
            ..RawBlock::default()
        };
        assert_eq!(raw.end_tx_index(), 47);
        assert_eq!(BlockRecord::new(&raw.encode()).unwrap().end_tx_index(), 47);
    }
}
