//! Shared builders for integration tests.

use std::collections::{BTreeMap, BTreeSet};

use ledgerscope_cluster::ClusterAccess;
use ledgerscope_core::address::{Address, AddressType, DedupAddress, DedupAddressType};
use ledgerscope_core::records::Inout;
use ledgerscope_core::types::Hash256;
use ledgerscope_store::scripts::ScriptHeader;
use ledgerscope_store::{ChainConfig, ChainWriter, DataAccess, DataConfig, NewBlock, NewTransaction, ScriptWriter};

/// Install a test-writer subscriber once; `RUST_LOG` overrides the `warn`
/// default.
pub fn init_logging() {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Pubkey identity `n`.
pub fn pk(n: u32) -> DedupAddress {
    DedupAddress::new(n, DedupAddressType::Pubkey)
}

/// A ledger under construction. Scripts are pubkey scripts `1..=pubkeys`
/// plus any scripthashes registered; transactions go into the most recently
/// opened block.
pub struct TestChain {
    pubkeys: u32,
    scripthashes: Vec<Option<Address>>,
    blocks: Vec<Vec<NewTransaction>>,
    locations: Vec<(usize, usize)>,
}

impl TestChain {
    pub fn new(pubkeys: u32) -> Self {
        Self {
            pubkeys,
            scripthashes: Vec::new(),
            blocks: Vec::new(),
            locations: Vec::new(),
        }
    }

    /// Register a scripthash script; returns its script number.
    pub fn scripthash(&mut self, wrapped: Option<Address>) -> u32 {
        self.scripthashes.push(wrapped);
        self.scripthashes.len() as u32
    }

    pub fn block(&mut self) -> &mut Self {
        self.blocks.push(Vec::new());
        self
    }

    pub fn tx_count(&self) -> u32 {
        self.locations.len() as u32
    }

    fn push(&mut self, tx: NewTransaction) -> u32 {
        if self.blocks.is_empty() {
            self.blocks.push(Vec::new());
        }
        let block = self.blocks.len() - 1;
        self.blocks[block].push(tx);
        self.locations.push((block, self.blocks[block].len() - 1));
        self.tx_count() - 1
    }

    /// Transaction with no inputs paying `(pubkey, value)` pairs.
    pub fn coinbase(&mut self, outputs: &[(u32, u64)]) -> u32 {
        self.push(NewTransaction::new(Vec::new(), pay_all(outputs)))
    }

    /// Transaction spending `(tx, output index)` references; marks each
    /// spent output with the new transaction's number.
    pub fn spend(&mut self, inputs: &[(u32, u16)], outputs: &[(u32, u64)]) -> u32 {
        let tx_num = self.tx_count();
        let mut entries = Vec::with_capacity(inputs.len());
        for (spent, index) in inputs {
            let (block, pos) = self.locations[*spent as usize];
            let output = &mut self.blocks[block][pos].outputs[usize::from(*index)];
            assert_eq!(output.linked_tx_num, 0, "output {spent}:{index} spent twice");
            output.linked_tx_num = tx_num;
            let address_type = output.address_type().unwrap_or(AddressType::Nonstandard);
            entries.push(Inout::new(*spent, output.script_num, address_type, output.value()));
        }
        self.push(NewTransaction::new(entries, pay_all(outputs)))
    }

    /// Transaction whose inputs name pubkey scripts directly, without a
    /// spent output behind them. Enough for clustering and traversal.
    pub fn loose(&mut self, input_scripts: &[u32], outputs: &[(u32, u64)]) -> u32 {
        let inputs = input_scripts
            .iter()
            .map(|s| Inout::new(0, *s, AddressType::PubkeyHash, 1_000))
            .collect();
        self.push(NewTransaction::new(inputs, pay_all(outputs)))
    }

    /// Write scripts and blocks to a fresh temporary data directory.
    pub fn write(self) -> TestLedger {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::create(dir.path(), ChainConfig::default()).unwrap();

        let mut scripts = ScriptWriter::open(&config).unwrap();
        for _ in 0..self.pubkeys {
            let header = ScriptHeader::new(0).with_type(AddressType::PubkeyHash);
            scripts.append_pubkey(header, None).unwrap();
        }
        for (i, wrapped) in self.scripthashes.iter().enumerate() {
            let header = ScriptHeader::new(0).with_type(AddressType::ScriptHash);
            let mut hash = [0u8; 32];
            hash[..4].copy_from_slice(&(i as u32).to_le_bytes());
            scripts.append_scripthash(header, hash, *wrapped).unwrap();
        }
        scripts.flush().unwrap();

        let mut writer = ChainWriter::open(&config).unwrap();
        for (height, txes) in self.blocks.into_iter().enumerate() {
            let mut hash = [0u8; 32];
            hash[..4].copy_from_slice(&(height as u32 + 1).to_le_bytes());
            let block = NewBlock::new(Hash256(hash), 1_600_000_000 + height as u32 * 600, txes);
            writer.append_block(block).unwrap();
        }
        writer.flush().unwrap();

        TestLedger {
            data: DataAccess::open(config).unwrap(),
            dir,
        }
    }
}

fn pay_all(outputs: &[(u32, u64)]) -> Vec<Inout> {
    outputs
        .iter()
        .map(|(script, value)| Inout::new(0, *script, AddressType::PubkeyHash, *value))
        .collect()
}

/// A written ledger. Dropping it removes the directory.
pub struct TestLedger {
    pub data: DataAccess,
    dir: tempfile::TempDir,
}

impl TestLedger {
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn cluster_dir(&self) -> std::path::PathBuf {
        self.data.config.cluster_dir()
    }
}

/// The partition as a set of member sets, independent of cluster ids.
pub fn partition(access: &ClusterAccess) -> BTreeSet<BTreeSet<DedupAddress>> {
    access.clusters().map(|c| c.addresses().collect()).collect()
}

/// Sequential reference: group `addresses` by repeatedly merging `links`.
pub fn reference_partition(
    addresses: impl IntoIterator<Item = DedupAddress>,
    links: &[(DedupAddress, DedupAddress)],
) -> BTreeSet<BTreeSet<DedupAddress>> {
    let mut owner: BTreeMap<DedupAddress, usize> = BTreeMap::new();
    let mut groups: Vec<BTreeSet<DedupAddress>> = Vec::new();
    for address in addresses {
        owner.insert(address, groups.len());
        groups.push(BTreeSet::from([address]));
    }
    for (a, b) in links {
        let (ga, gb) = (owner[a], owner[b]);
        if ga == gb {
            continue;
        }
        let moved = std::mem::take(&mut groups[gb]);
        for address in &moved {
            owner.insert(*address, ga);
        }
        groups[ga].extend(moved);
    }
    groups.into_iter().filter(|g| !g.is_empty()).collect()
}
