//! Synthetic ledgers with a populated script store.

use ledgerscope_core::address::{Address, AddressType};
use ledgerscope_core::constants::TX_HEADER_SIZE;
use ledgerscope_core::records::Inout;
use ledgerscope_core::types::Hash256;
use ledgerscope_store::scripts::ScriptHeader;
use ledgerscope_store::{ChainConfig, ChainWriter, DataAccess, DataConfig, NewBlock, NewTransaction, ScriptWriter};
use tempfile::TempDir;

/// Input spending from pubkey script `script`.
pub fn from(script: u32, value: u64) -> Inout {
    Inout::new(0, script, AddressType::PubkeyHash, value)
}

/// Output paying pubkey script `script`.
pub fn pay(script: u32, value: u64) -> Inout {
    Inout::new(0, script, AddressType::PubkeyHash, value)
}

pub fn tx(inputs: Vec<Inout>, outputs: Vec<Inout>) -> NewTransaction {
    NewTransaction::new(inputs, outputs)
}

pub struct Ledger {
    pub data: DataAccess,
    dir: TempDir,
}

impl Ledger {
    /// Store root; cluster output goes under `clusters/`.
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn cluster_dir(&self) -> std::path::PathBuf {
        self.data.config.cluster_dir()
    }

    /// Give the first entry of `tx_num` an unknown address type tag and
    /// reopen the store. Leave the last transaction intact, since opening
    /// checks it.
    pub fn corrupt_tx(&mut self, tx_num: u32) {
        use std::io::{Seek, SeekFrom, Write};

        let offset = self.data.chain.tx_offset(tx_num).unwrap();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(self.data.config.tx_file())
            .unwrap();
        file.seek(SeekFrom::Start(offset + TX_HEADER_SIZE as u64 + 15)).unwrap();
        file.write_all(&[0xf0]).unwrap();
        drop(file);
        self.data = DataAccess::open(self.data.config.clone()).unwrap();
    }
}

/// Writes `pubkeys` pubkey scripts, the given scripthash scripts, and one
/// block per entry of `blocks`.
pub fn ledger(pubkeys: u32, scripthashes: &[Option<Address>], blocks: Vec<Vec<NewTransaction>>) -> Ledger {
    let dir = tempfile::tempdir().unwrap();
    let config = DataConfig::create(dir.path(), ChainConfig::default()).unwrap();

    let mut scripts = ScriptWriter::open(&config).unwrap();
    for _ in 0..pubkeys {
        scripts
            .append_pubkey(ScriptHeader::new(0).with_type(AddressType::PubkeyHash), None)
            .unwrap();
    }
    for (i, wrapped) in scripthashes.iter().enumerate() {
        let header = ScriptHeader::new(0).with_type(AddressType::ScriptHash);
        scripts.append_scripthash(header, [i as u8; 32], *wrapped).unwrap();
    }
    scripts.flush().unwrap();

    let mut writer = ChainWriter::open(&config).unwrap();
    for (height, txes) in blocks.into_iter().enumerate() {
        let mut hash = [0u8; 32];
        hash[..4].copy_from_slice(&(height as u32 + 1).to_le_bytes());
        writer
            .append_block(NewBlock::new(Hash256(hash), 1_600_000_000 + height as u32 * 600, txes))
            .unwrap();
    }
    writer.flush().unwrap();

    let data = DataAccess::open(config).unwrap();
    Ledger { data, dir }
}
