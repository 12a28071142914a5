//! Appenders for the chain and script stores.
//!
//! Writers only ever append, so readers holding a mapping keep seeing a
//! consistent prefix and pick up the new records on `reload`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ledgerscope_core::address::{Address, DedupAddressType};
use ledgerscope_core::constants::{BLOCK_RECORD_SIZE, TX_OFFSET_SIZE};
use ledgerscope_core::error::StoreError;
use ledgerscope_core::records::{BlockRecord, Inout, RawBlock, encode_tx};
use ledgerscope_core::types::Hash256;

use crate::config::DataConfig;
use crate::file_mapper::IndexedFile;
use crate::scripts::{DataScript, MultisigScript, PubkeyScript, ScriptHashScript, ScriptHeader, fixed_script_size};

/// Serialized header size a block record's `size` fields add on top of its
/// transactions.
const BLOCK_HEADER_BYTES: u32 = 80;

/// A transaction to append. In/out entries arrive fully linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub locktime: u32,
    pub total_size: u32,
    pub base_size: u32,
    pub inputs: Vec<Inout>,
    pub outputs: Vec<Inout>,
}

impl NewTransaction {
    /// Transaction with sizes estimated from its entry counts, saturating
    /// at `u32::MAX`.
    pub fn new(inputs: Vec<Inout>, outputs: Vec<Inout>) -> Self {
        let estimate = 10 + 41 * inputs.len() as u64 + 34 * outputs.len() as u64;
        let size = u32::try_from(estimate).unwrap_or(u32::MAX);
        Self {
            locktime: 0,
            total_size: size,
            base_size: size,
            inputs,
            outputs,
        }
    }

    pub fn with_locktime(mut self, locktime: u32) -> Self {
        self.locktime = locktime;
        self
    }

    pub fn with_sizes(mut self, total_size: u32, base_size: u32) -> Self {
        self.total_size = total_size;
        self.base_size = base_size;
        self
    }
}

/// A block to append. Counts, heights and first-transaction index are
/// filled in by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub hash: Hash256,
    pub version: i32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub coinbase: Vec<u8>,
    pub txes: Vec<NewTransaction>,
}

impl NewBlock {
    pub fn new(hash: Hash256, timestamp: u32, txes: Vec<NewTransaction>) -> Self {
        Self {
            hash,
            version: 1,
            timestamp,
            bits: 0x1d00_ffff,
            nonce: 0,
            coinbase: Vec::new(),
            txes,
        }
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>, StoreError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    Ok(BufWriter::new(file))
}

fn file_len(path: &Path) -> Result<u64, StoreError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Appends blocks and their transactions to the chain store.
pub struct ChainWriter {
    blocks: BufWriter<File>,
    tx_data: BufWriter<File>,
    tx_index: Option<BufWriter<File>>,
    coinbases: BufWriter<File>,
    block_path: PathBuf,
    next_height: u32,
    next_tx: u32,
    data_offset: u64,
    coinbase_offset: u64,
}

impl ChainWriter {
    /// Open the chain store for appending, resuming after the last block.
    pub fn open(config: &DataConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(config.chain_dir()).map_err(|e| StoreError::io(config.chain_dir(), e))?;
        let block_path = config.block_file();
        let block_len = file_len(&block_path)?;
        if block_len % BLOCK_RECORD_SIZE as u64 != 0 {
            return Err(StoreError::Misaligned {
                path: block_path,
                len: block_len,
                stride: BLOCK_RECORD_SIZE,
            });
        }
        let next_height = (block_len / BLOCK_RECORD_SIZE as u64) as u32;
        let next_tx = match next_height {
            0 => 0,
            _ => read_last_block(&block_path, block_len)?.end_tx_index(),
        };

        let index_path = config.tx_index_file();
        let indexed = file_len(&index_path)? / TX_OFFSET_SIZE as u64;
        let tx_index = if indexed == u64::from(next_tx) {
            Some(open_append(&index_path)?)
        } else {
            tracing::warn!(indexed, txes = next_tx, "offset index out of step; appending without it");
            None
        };

        Ok(Self {
            blocks: open_append(&block_path)?,
            tx_data: open_append(&config.tx_file())?,
            tx_index,
            coinbases: open_append(&config.coinbase_file())?,
            data_offset: file_len(&config.tx_file())?,
            coinbase_offset: file_len(&config.coinbase_file())?,
            block_path,
            next_height,
            next_tx,
        })
    }

    /// Height the next appended block receives.
    pub fn next_height(&self) -> u32 {
        self.next_height
    }

    /// Transaction number the next appended transaction receives.
    pub fn next_tx_num(&self) -> u32 {
        self.next_tx
    }

    /// Append `block`, returning its height.
    pub fn append_block(&mut self, block: NewBlock) -> Result<u32, StoreError> {
        let height = self.next_height;
        let first_tx_index = self.next_tx;
        let (mut input_count, mut output_count) = (0u32, 0u32);
        let (mut size, mut base_size) = (BLOCK_HEADER_BYTES, BLOCK_HEADER_BYTES);

        let tx_count = u32::try_from(block.txes.len()).map_err(|_| StoreError::overflow("block tx count", block.txes.len()))?;
        self.next_tx
            .checked_add(tx_count)
            .ok_or_else(|| StoreError::overflow("tx number", u64::from(self.next_tx) + u64::from(tx_count)))?;
        let coinbase_len =
            u32::try_from(block.coinbase.len()).map_err(|_| StoreError::overflow("coinbase length", block.coinbase.len()))?;
        let encoded = block
            .txes
            .iter()
            .map(|tx| encode_tx(tx.locktime, tx.total_size, tx.base_size, &tx.inputs, &tx.outputs))
            .collect::<Result<Vec<_>, _>>()?;
        for tx in &block.txes {
            input_count = checked_sum("block input count", input_count, tx.inputs.len())?;
            output_count = checked_sum("block output count", output_count, tx.outputs.len())?;
            size = checked_sum("block size", size, tx.total_size as usize)?;
            base_size = checked_sum("block base size", base_size, tx.base_size as usize)?;
        }

        for bytes in &encoded {
            if let Some(index) = self.tx_index.as_mut() {
                index
                    .write_all(&self.data_offset.to_le_bytes())
                    .map_err(|e| StoreError::io(&self.block_path, e))?;
            }
            self.tx_data
                .write_all(bytes)
                .map_err(|e| StoreError::io(&self.block_path, e))?;
            self.data_offset += bytes.len() as u64;
        }

        let coinbase_offset = self.coinbase_offset;
        self.coinbases
            .write_all(&coinbase_len.to_le_bytes())
            .and_then(|()| self.coinbases.write_all(&block.coinbase))
            .map_err(|e| StoreError::io(&self.block_path, e))?;
        self.coinbase_offset += 4 + block.coinbase.len() as u64;

        let raw = RawBlock {
            hash: block.hash,
            coinbase_offset,
            first_tx_index,
            tx_count,
            input_count,
            output_count,
            height,
            version: block.version,
            timestamp: block.timestamp,
            bits: block.bits,
            nonce: block.nonce,
            size,
            base_size,
        };
        self.blocks
            .write_all(&raw.encode())
            .map_err(|e| StoreError::io(&self.block_path, e))?;

        self.next_height += 1;
        self.next_tx += raw.tx_count;
        Ok(height)
    }

    /// Flush transaction data before block records so a reader never sees a
    /// block whose transactions are not yet on disk.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let io = |e| StoreError::io(&self.block_path, e);
        self.tx_data.flush().map_err(io)?;
        if let Some(index) = self.tx_index.as_mut() {
            index.flush().map_err(io)?;
        }
        self.coinbases.flush().map_err(io)?;
        self.blocks.flush().map_err(io)
    }
}

fn checked_sum(field: &'static str, total: u32, add: usize) -> Result<u32, StoreError> {
    u32::try_from(add)
        .ok()
        .and_then(|add| total.checked_add(add))
        .ok_or_else(|| StoreError::overflow(field, u64::from(total) + add as u64))
}

fn read_last_block(path: &Path, len: u64) -> Result<RawBlock, StoreError> {
    let mut file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut buf = [0u8; BLOCK_RECORD_SIZE];
    file.seek(SeekFrom::Start(len - BLOCK_RECORD_SIZE as u64))
        .and_then(|_| file.read_exact(&mut buf))
        .map_err(|e| StoreError::io(path, e))?;
    BlockRecord::new(&buf)
        .map(|b| b.to_raw())
        .ok_or(StoreError::TruncatedRecord {
            offset: len,
            needed: BLOCK_RECORD_SIZE as u64,
            available: 0,
        })
}

// --- Scripts ---

enum ScriptSink {
    Fixed(BufWriter<File>),
    Indexed {
        data: BufWriter<File>,
        index: BufWriter<File>,
        offset: u64,
    },
}

/// Appends scripts, assigning 1-based script numbers per dedup type.
pub struct ScriptWriter {
    sinks: Vec<ScriptSink>,
    counts: Vec<u32>,
    dir: PathBuf,
}

impl ScriptWriter {
    pub fn open(config: &DataConfig) -> Result<Self, StoreError> {
        let dir = config.scripts_dir();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut sinks = Vec::with_capacity(DedupAddressType::COUNT);
        let mut counts = Vec::with_capacity(DedupAddressType::COUNT);
        for dedup in DedupAddressType::ALL {
            match fixed_script_size(dedup) {
                Some(stride) => {
                    let path = config.script_file(dedup);
                    counts.push((file_len(&path)? / stride as u64) as u32);
                    sinks.push(ScriptSink::Fixed(open_append(&path)?));
                }
                None => {
                    let (data_path, index_path) = IndexedFile::paths(&dir, dedup.name());
                    counts.push((file_len(&index_path)? / TX_OFFSET_SIZE as u64) as u32);
                    sinks.push(ScriptSink::Indexed {
                        offset: file_len(&data_path)?,
                        data: open_append(&data_path)?,
                        index: open_append(&index_path)?,
                    });
                }
            }
        }
        Ok(Self { sinks, counts, dir })
    }

    fn append(&mut self, dedup: DedupAddressType, bytes: &[u8]) -> Result<u32, StoreError> {
        let io = |e| StoreError::io(&self.dir, e);
        match &mut self.sinks[dedup.index()] {
            ScriptSink::Fixed(out) => out.write_all(bytes).map_err(io)?,
            ScriptSink::Indexed { data, index, offset } => {
                index.write_all(&offset.to_le_bytes()).map_err(io)?;
                data.write_all(bytes).map_err(io)?;
                *offset += bytes.len() as u64;
            }
        }
        let count = &mut self.counts[dedup.index()];
        *count += 1;
        Ok(*count)
    }

    pub fn count(&self, dedup: DedupAddressType) -> u32 {
        self.counts[dedup.index()]
    }

    pub fn append_pubkey(&mut self, header: ScriptHeader, pubkey: Option<[u8; 65]>) -> Result<u32, StoreError> {
        let bytes = PubkeyScript { header, pubkey }.encode();
        self.append(DedupAddressType::Pubkey, &bytes)
    }

    pub fn append_scripthash(
        &mut self,
        header: ScriptHeader,
        hash: [u8; 32],
        wrapped: Option<Address>,
    ) -> Result<u32, StoreError> {
        let bytes = ScriptHashScript { header, hash, wrapped }.encode();
        self.append(DedupAddressType::ScriptHash, &bytes)
    }

    pub fn append_multisig(&mut self, header: ScriptHeader, required: u8, members: &[u32]) -> Result<u32, StoreError> {
        let total = u8::try_from(members.len()).map_err(|_| StoreError::overflow("multisig key count", members.len()))?;
        let bytes = MultisigScript {
            header,
            required,
            total,
            members: members.to_vec(),
        }
        .encode();
        self.append(DedupAddressType::Multisig, &bytes)
    }

    pub fn append_nonstandard(&mut self, header: ScriptHeader, script: &[u8]) -> Result<u32, StoreError> {
        check_data_len(script)?;
        self.append(DedupAddressType::Nonstandard, &DataScript::encode(&header, script))
    }

    pub fn append_null_data(&mut self, header: ScriptHeader, data: &[u8]) -> Result<u32, StoreError> {
        check_data_len(data)?;
        self.append(DedupAddressType::NullData, &DataScript::encode(&header, data))
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        let io = |e| StoreError::io(&self.dir, e);
        for sink in &mut self.sinks {
            match sink {
                ScriptSink::Fixed(out) => out.flush().map_err(io)?,
                ScriptSink::Indexed { data, index, .. } => {
                    data.flush().map_err(io)?;
                    index.flush().map_err(io)?;
                }
            }
        }
        Ok(())
    }
}

fn check_data_len(data: &[u8]) -> Result<(), StoreError> {
    u32::try_from(data.len())
        .map(|_| ())
        .map_err(|_| StoreError::overflow("script length", data.len()))
}
