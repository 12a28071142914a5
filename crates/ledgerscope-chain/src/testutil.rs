//! Small on-disk chains for unit tests.

use ledgerscope_core::address::AddressType;
use ledgerscope_core::constants::TX_HEADER_SIZE;
use ledgerscope_core::records::Inout;
use ledgerscope_core::types::Hash256;
use ledgerscope_store::config::ChainConfig;
use ledgerscope_store::{ChainAccess, ChainWriter, DataConfig, NewBlock, NewTransaction};
use tempfile::TempDir;

/// Output paying `value` to pubkey-hash script `script`.
pub fn out(script: u32, value: u64) -> Inout {
    Inout::new(0, script, AddressType::PubkeyHash, value)
}

/// Output of an explicit address type.
pub fn out_typed(script: u32, address_type: AddressType, value: u64) -> Inout {
    Inout::new(0, script, address_type, value)
}

/// Input spending an output of `spent_tx`.
pub fn spend(spent_tx: u32, script: u32, value: u64) -> Inout {
    Inout::new(spent_tx, script, AddressType::PubkeyHash, value)
}

/// Accumulates blocks in memory, then writes them to a temporary store.
pub struct Fixture {
    blocks: Vec<Vec<NewTransaction>>,
    _dir: Option<TempDir>,
    config: Option<DataConfig>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            _dir: None,
            config: None,
        }
    }

    /// Append a block of `(inputs, outputs)` transactions.
    pub fn block(&mut self, txes: Vec<(Vec<Inout>, Vec<Inout>)>) -> &mut Self {
        let txes = txes
            .into_iter()
            .map(|(inputs, outputs)| NewTransaction::new(inputs, outputs))
            .collect();
        self.blocks.push(txes);
        self
    }

    pub fn block_txes(&mut self, txes: Vec<NewTransaction>) -> &mut Self {
        self.blocks.push(txes);
        self
    }

    /// Append `count` blocks holding one coinbase each.
    pub fn coinbase_blocks(&mut self, count: u32) -> &mut Self {
        for _ in 0..count {
            self.block(vec![(vec![], vec![out(1, 50)])]);
        }
        self
    }

    /// Mark output `output` of `tx_num` as spent by `spending_tx`.
    pub fn link_spend(&mut self, tx_num: u32, output: usize, spending_tx: u32) -> &mut Self {
        let tx = self
            .blocks
            .iter_mut()
            .flat_map(|b| b.iter_mut())
            .nth(tx_num as usize)
            .expect("link_spend: no such transaction");
        tx.outputs[output].linked_tx_num = spending_tx;
        self
    }

    pub fn write(&mut self) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::create(dir.path(), ChainConfig::default()).unwrap();
        let mut writer = ChainWriter::open(&config).unwrap();
        for (height, txes) in std::mem::take(&mut self.blocks).into_iter().enumerate() {
            let mut hash = [0u8; 32];
            hash[..4].copy_from_slice(&(height as u32 + 1).to_le_bytes());
            let block = NewBlock::new(Hash256(hash), 1_600_000_000 + height as u32 * 600, txes);
            writer.append_block(block).unwrap();
        }
        writer.flush().unwrap();
        Fixture {
            blocks: Vec::new(),
            _dir: Some(dir),
            config: Some(config),
        }
    }

    pub fn config(&self) -> &DataConfig {
        self.config.as_ref().expect("fixture not written")
    }

    /// Give the first entry of `tx_num` an unknown address type tag, so that
    /// reading the record fails.
    pub fn corrupt_tx(&self, tx_num: u32) {
        use std::io::{Seek, SeekFrom, Write};

        let offset = self.chain().tx_offset(tx_num).unwrap();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(self.config().tx_file())
            .unwrap();
        file.seek(SeekFrom::Start(offset + TX_HEADER_SIZE as u64 + 15)).unwrap();
        file.write_all(&[0xf0]).unwrap();
    }

    pub fn chain(&self) -> ChainAccess {
        ChainAccess::open(self.config()).unwrap()
    }
}
