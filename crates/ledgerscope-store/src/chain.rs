//! Block and transaction record store.
//!
//! `chain/block.dat` is a dense array of 88-byte block records indexed by
//! height. `chain/tx_data.dat` is a byte stream of variable-length
//! transaction records; record `n + 1` starts where record `n` ends, so
//! locating transaction `n` needs either a walk or the per-transaction
//! offset index `chain/tx_index.dat`. When the index is missing or shorter
//! than the blocks declare, the missing tail is rebuilt in memory by walking
//! the data file, which also validates every walked record.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use ledgerscope_core::constants::{BLOCK_RECORD_SIZE, TX_HEADER_SIZE, TX_OFFSET_SIZE};
use ledgerscope_core::error::{ChainError, LedgerError, StoreError};
use ledgerscope_core::records::{BlockRecord, TxRecord, le_u32, le_u64};
use ledgerscope_core::types::Hash256;

use crate::config::DataConfig;
use crate::file_mapper::{FixedFile, MappedFile};

// --- Offset index ---

/// Byte offsets of every declared transaction: a persisted prefix plus an
/// in-memory tail built by walking.
#[derive(Debug)]
struct TxOffsets {
    persisted: Option<FixedFile>,
    appended_base: u64,
    appended: Vec<u64>,
}

impl TxOffsets {
    fn new(persisted: Option<FixedFile>) -> Self {
        let appended_base = persisted.as_ref().map_or(0, FixedFile::count);
        Self {
            persisted,
            appended_base,
            appended: Vec::new(),
        }
    }

    fn persisted_count(&self) -> u64 {
        self.persisted.as_ref().map_or(0, FixedFile::count)
    }

    fn len(&self) -> u64 {
        self.persisted_count()
            .max(self.appended_base + self.appended.len() as u64)
    }

    fn get(&self, tx_num: u64) -> Option<u64> {
        if tx_num < self.persisted_count() {
            return self.persisted.as_ref()?.get(tx_num).map(|b| le_u64(b, 0));
        }
        let slot = tx_num.checked_sub(self.appended_base)?;
        self.appended.get(usize::try_from(slot).ok()?).copied()
    }

    /// Swap in a freshly mapped index, dropping walked entries it now covers.
    fn replace_persisted(&mut self, persisted: Option<FixedFile>) {
        self.persisted = persisted;
        let covered = self.persisted_count();
        if covered > self.appended_base {
            let skip = usize::try_from(covered - self.appended_base)
                .unwrap_or(usize::MAX)
                .min(self.appended.len());
            self.appended.drain(..skip);
            self.appended_base += skip as u64;
        }
    }
}

/// Counts of records that became visible during a [`ChainAccess::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadSummary {
    pub new_blocks: u32,
    pub new_txes: u64,
}

/// Read access to the block and transaction stores.
///
/// All accessors are `&self` and the mappings are read-only, so one
/// `ChainAccess` can be shared across worker threads. [`reload`] takes
/// `&mut self`, which keeps borrowed records from outliving a remap.
///
/// [`reload`]: ChainAccess::reload
#[derive(Debug)]
pub struct ChainAccess {
    blocks: FixedFile,
    tx_data: MappedFile,
    offsets: TxOffsets,
    coinbases: MappedFile,
    tx_index_path: PathBuf,
    stored_blocks: u32,
    blocks_ignored: u32,
    error_on_reorg: bool,
    tip_hash: Option<Hash256>,
}

impl ChainAccess {
    /// Map the chain store under `config`, creating empty files if absent.
    pub fn open(config: &DataConfig) -> Result<Self, LedgerError> {
        let blocks = FixedFile::open_or_create(config.block_file(), BLOCK_RECORD_SIZE)?;
        let tx_data = MappedFile::open_or_create(config.tx_file())?;
        let coinbases = MappedFile::open_or_create(config.coinbase_file())?;
        let persisted = FixedFile::open_existing(config.tx_index_file(), TX_OFFSET_SIZE)?;

        let mut access = Self {
            blocks,
            tx_data,
            offsets: TxOffsets::new(persisted),
            coinbases,
            tx_index_path: config.tx_index_file(),
            stored_blocks: 0,
            blocks_ignored: config.blocks_ignored,
            error_on_reorg: config.error_on_reorg,
            tip_hash: None,
        };
        access.admit_blocks()?;
        tracing::info!(
            blocks = access.block_count(),
            txes = access.tx_count(),
            path = %config.chain_dir().display(),
            "opened chain store"
        );
        Ok(access)
    }

    /// Validate blocks appended since the last admission and make them visible.
    fn admit_blocks(&mut self) -> Result<u32, StoreError> {
        let on_disk = u32::try_from(self.blocks.count()).map_err(|_| StoreError::CorruptRecord {
            offset: 0,
            reason: "block file exceeds u32 heights".into(),
        })?;
        let from = self.stored_blocks;
        for height in from..on_disk {
            self.check_block_link(height)?;
        }
        let declared = match on_disk.checked_sub(1) {
            Some(last) => self.raw_block(last).map_or(0, |b| u64::from(b.end_tx_index())),
            None => 0,
        };
        self.sync_offsets(declared)?;
        self.stored_blocks = on_disk;
        self.tip_hash = self.visible_tip().map(|b| b.hash());
        Ok(on_disk - from)
    }

    fn check_block_link(&self, height: u32) -> Result<(), StoreError> {
        let offset = u64::from(height) * BLOCK_RECORD_SIZE as u64;
        let block = self.raw_block(height).ok_or_else(|| StoreError::TruncatedRecord {
            offset,
            needed: BLOCK_RECORD_SIZE as u64,
            available: 0,
        })?;
        if block.height() != height {
            return Err(StoreError::CorruptRecord {
                offset,
                reason: format!("block at position {height} claims height {}", block.height()),
            });
        }
        let expected_first = match height.checked_sub(1) {
            Some(prev) => self.raw_block(prev).map_or(0, |b| b.end_tx_index()),
            None => 0,
        };
        if block.first_tx_index() != expected_first {
            return Err(StoreError::CorruptRecord {
                offset,
                reason: format!(
                    "block {height} starts at tx {}, expected {expected_first}",
                    block.first_tx_index()
                ),
            });
        }
        Ok(())
    }

    /// Make sure offsets cover `declared` transactions and that the last one
    /// fits inside the data file.
    fn sync_offsets(&mut self, declared: u64) -> Result<(), StoreError> {
        let known = self.offsets.len();
        if known >= declared {
            if let Some(last) = declared.checked_sub(1) {
                let offset = self.offsets.get(last).ok_or(StoreError::IndexMismatch {
                    indexed: known,
                    declared,
                })?;
                self.tx_at(offset)?;
            }
            return Ok(());
        }

        let mut cursor = match known.checked_sub(1) {
            Some(last) => {
                let offset = self.offsets.get(last).ok_or(StoreError::IndexMismatch {
                    indexed: known,
                    declared,
                })?;
                offset + self.tx_at(offset)?.len() as u64
            }
            None => 0,
        };
        let mut walked = Vec::new();
        for _ in known..declared {
            let len = self.tx_at(cursor)?.len() as u64;
            walked.push(cursor);
            cursor += len;
        }
        tracing::debug!(count = walked.len(), "walked transaction records into offset index");
        self.offsets.appended.extend(walked);
        Ok(())
    }

    /// Re-map files that grew and admit newly appended blocks.
    ///
    /// Fails with [`ChainError::ReorgDetected`] if the previously visible tip
    /// no longer carries the same hash, and with [`StoreError::Shrunk`] if a
    /// file was truncated underneath the mapping.
    pub fn reload(&mut self) -> Result<ReloadSummary, LedgerError> {
        let old_txes = self.tx_count();
        self.blocks.reload()?;
        self.check_reorg()?;
        self.tx_data.reload()?;
        self.coinbases.reload()?;
        let persisted = FixedFile::open_existing(&self.tx_index_path, TX_OFFSET_SIZE)?;
        self.offsets.replace_persisted(persisted);
        let new_blocks = self.admit_blocks()?;
        let summary = ReloadSummary {
            new_blocks,
            new_txes: u64::from(self.tx_count() - old_txes),
        };
        if new_blocks > 0 {
            tracing::info!(new_blocks, new_txes = summary.new_txes, "reloaded chain store");
        }
        Ok(summary)
    }

    /// Compare the tip seen at open/reload with what is on disk now.
    pub fn check_reorg(&self) -> Result<(), ChainError> {
        let Some(expected) = self.tip_hash else {
            return Ok(());
        };
        let height = self.block_count().saturating_sub(1);
        let found = self.raw_block(height).map(|b| b.hash());
        if found != Some(expected) {
            return Err(ChainError::ReorgDetected {
                height,
                expected: expected.to_display_hex(),
                found: found.map_or_else(|| "<missing>".to_string(), |h| h.to_display_hex()),
            });
        }
        Ok(())
    }

    fn guard(&self) -> Result<(), ChainError> {
        if self.error_on_reorg {
            self.check_reorg()?;
        }
        Ok(())
    }

    /// Write every known offset to `chain/tx_index.dat` and map it.
    pub fn persist_offset_index(&mut self) -> Result<(), StoreError> {
        let tmp = self.tx_index_path.with_extension("dat.tmp");
        let file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        let mut out = BufWriter::new(file);
        for tx_num in 0..self.offsets.len() {
            if let Some(offset) = self.offsets.get(tx_num) {
                out.write_all(&offset.to_le_bytes())
                    .map_err(|e| StoreError::io(&tmp, e))?;
            }
        }
        out.flush().map_err(|e| StoreError::io(&tmp, e))?;
        drop(out);
        fs::rename(&tmp, &self.tx_index_path).map_err(|e| StoreError::io(&self.tx_index_path, e))?;
        let persisted = FixedFile::open_existing(&self.tx_index_path, TX_OFFSET_SIZE)?;
        self.offsets.replace_persisted(persisted);
        tracing::info!(entries = self.offsets.persisted_count(), "persisted transaction offset index");
        Ok(())
    }

    // --- Bounds ---

    /// Number of visible blocks (stored blocks minus the ignored tail).
    pub fn block_count(&self) -> u32 {
        self.stored_blocks.saturating_sub(self.blocks_ignored)
    }

    /// Highest visible height, `None` for an empty chain.
    pub fn max_height(&self) -> Option<u32> {
        self.block_count().checked_sub(1)
    }

    /// Number of transactions in the visible blocks.
    pub fn tx_count(&self) -> u32 {
        self.visible_tip().map_or(0, |b| b.end_tx_index())
    }

    /// Number of transactions across every stored block, ignored or not.
    pub fn stored_tx_count(&self) -> u64 {
        self.offsets.len()
    }

    /// Hash of the newest visible block.
    pub fn tip_hash(&self) -> Option<Hash256> {
        self.tip_hash
    }

    fn visible_tip(&self) -> Option<BlockRecord<'_>> {
        self.raw_block(self.block_count().checked_sub(1)?)
    }

    // --- Blocks ---

    fn raw_block(&self, height: u32) -> Option<BlockRecord<'_>> {
        self.blocks.get(u64::from(height)).and_then(BlockRecord::new)
    }

    /// Block record at `height`.
    pub fn block(&self, height: u32) -> Result<BlockRecord<'_>, ChainError> {
        self.guard()?;
        if height >= self.block_count() {
            return Err(ChainError::out_of_range("height", height, self.block_count()));
        }
        self.raw_block(height)
            .ok_or_else(|| ChainError::out_of_range("height", height, self.block_count()))
    }

    /// First height in `[lo, hi)` whose first transaction index is at least
    /// `tx_num`, or `hi` if none is.
    pub fn lower_bound_first_tx(&self, lo: u32, hi: u32, tx_num: u32) -> u32 {
        self.partition_heights(lo, hi, |first| first < tx_num)
    }

    /// First height in `[lo, hi)` whose first transaction index is greater
    /// than `tx_num`, or `hi` if none is.
    pub fn upper_bound_first_tx(&self, lo: u32, hi: u32, tx_num: u32) -> u32 {
        self.partition_heights(lo, hi, |first| first <= tx_num)
    }

    fn partition_heights(&self, mut lo: u32, mut hi: u32, below: impl Fn(u32) -> bool) -> u32 {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let first = self.raw_block(mid).map_or(u32::MAX, |b| b.first_tx_index());
            if below(first) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Height of the block containing transaction `tx_num`.
    pub fn block_height_of(&self, tx_num: u32) -> Result<u32, ChainError> {
        if tx_num >= self.tx_count() {
            return Err(ChainError::out_of_range("tx", tx_num, self.tx_count()));
        }
        Ok(self.upper_bound_first_tx(0, self.block_count(), tx_num) - 1)
    }

    /// Coinbase script bytes stored for `block`.
    pub fn coinbase(&self, block: &BlockRecord<'_>) -> Result<&[u8], StoreError> {
        let offset = block.coinbase_offset();
        let truncated = |needed: u64| StoreError::TruncatedRecord {
            offset,
            needed,
            available: self.coinbases.len().saturating_sub(offset),
        };
        let len_bytes = self.coinbases.slice(offset, 4).ok_or_else(|| truncated(4))?;
        let len = le_u32(len_bytes, 0) as usize;
        self.coinbases
            .slice(offset + 4, len)
            .ok_or_else(|| truncated(4 + len as u64))
    }

    // --- Transactions ---

    /// Byte offset of transaction `tx_num` in the data file.
    pub fn tx_offset(&self, tx_num: u32) -> Result<u64, ChainError> {
        if tx_num >= self.tx_count() {
            return Err(ChainError::out_of_range("tx", tx_num, self.tx_count()));
        }
        self.offsets
            .get(u64::from(tx_num))
            .ok_or_else(|| ChainError::out_of_range("tx", tx_num, self.offsets.len()))
    }

    /// Transaction record starting at byte `offset`.
    pub fn tx_at(&self, offset: u64) -> Result<TxRecord<'_>, StoreError> {
        let tail = self.tx_data.tail(offset).ok_or(StoreError::TruncatedRecord {
            offset,
            needed: TX_HEADER_SIZE as u64,
            available: 0,
        })?;
        TxRecord::parse(tail, offset)
    }

    /// Offset of the record following `record`, which starts at `offset`.
    pub fn advance(offset: u64, record: &TxRecord<'_>) -> u64 {
        offset + record.len() as u64
    }

    /// Transaction record `tx_num`.
    pub fn tx(&self, tx_num: u32) -> Result<TxRecord<'_>, LedgerError> {
        self.guard()?;
        let offset = self.tx_offset(tx_num)?;
        Ok(self.tx_at(offset)?)
    }
}
