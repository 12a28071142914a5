//! Script store: one dense, 1-based array per dedup type.
//!
//! Pubkey and scripthash scripts are fixed-size records in
//! `scripts/<name>.dat`. Multisig, nonstandard and null-data scripts vary in
//! length and are stored as `<name>_data.dat` plus a `u64` offset index.
//! Every record starts with a 12-byte [`ScriptHeader`].

use ledgerscope_core::address::{Address, AddressType, DedupAddressType};
use ledgerscope_core::constants::{NEVER_SPENT, PUBKEY_SCRIPT_SIZE, SCRIPT_HEADER_SIZE, SCRIPTHASH_SCRIPT_SIZE};
use ledgerscope_core::error::{ChainError, LedgerError, StoreError};
use ledgerscope_core::records::{le_u16, le_u32};
use ledgerscope_core::traits::WrappedAddressResolver;

use crate::config::DataConfig;
use crate::file_mapper::{FixedFile, IndexedFile};

/// Usage metadata shared by every script kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptHeader {
    /// First transaction with an output to this script.
    pub tx_first_seen: u32,
    /// First transaction spending from this script.
    pub tx_first_spent: Option<u32>,
    /// Bitmask of address types this script was used as.
    pub types_seen: u32,
}

impl ScriptHeader {
    pub fn new(tx_first_seen: u32) -> Self {
        Self {
            tx_first_seen,
            tx_first_spent: None,
            types_seen: 0,
        }
    }

    pub fn with_type(mut self, address_type: AddressType) -> Self {
        self.types_seen |= address_type.bit();
        self
    }

    pub fn seen(&self, address_type: AddressType) -> bool {
        self.types_seen & address_type.bit() != 0
    }

    /// Address types this script has been used as, in tag order.
    pub fn seen_types(&self) -> impl Iterator<Item = AddressType> + '_ {
        AddressType::ALL.into_iter().filter(|t| self.seen(*t))
    }

    pub fn encode(&self) -> [u8; SCRIPT_HEADER_SIZE] {
        let mut out = [0u8; SCRIPT_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.tx_first_seen.to_le_bytes());
        out[4..8].copy_from_slice(&self.tx_first_spent.unwrap_or(NEVER_SPENT).to_le_bytes());
        out[8..12].copy_from_slice(&self.types_seen.to_le_bytes());
        out
    }

    fn decode(b: &[u8]) -> Self {
        let spent = le_u32(b, 4);
        Self {
            tx_first_seen: le_u32(b, 0),
            tx_first_spent: (spent != NEVER_SPENT).then_some(spent),
            types_seen: le_u32(b, 8),
        }
    }
}

/// A public key script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubkeyScript {
    pub header: ScriptHeader,
    /// Uncompressed or compressed key, if it has been revealed.
    pub pubkey: Option<[u8; 65]>,
}

impl PubkeyScript {
    pub fn encode(&self) -> [u8; PUBKEY_SCRIPT_SIZE] {
        let mut out = [0u8; PUBKEY_SCRIPT_SIZE];
        out[..SCRIPT_HEADER_SIZE].copy_from_slice(&self.header.encode());
        if let Some(key) = &self.pubkey {
            out[12..77].copy_from_slice(key);
            out[77] = 1;
        }
        out
    }

    fn decode(b: &[u8]) -> Self {
        let pubkey = (b[77] != 0).then(|| {
            let mut key = [0u8; 65];
            key.copy_from_slice(&b[12..77]);
            key
        });
        Self {
            header: ScriptHeader::decode(b),
            pubkey,
        }
    }
}

/// A pay-to-script-hash script and, once spent, the address it wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHashScript {
    pub header: ScriptHeader,
    pub hash: [u8; 32],
    pub wrapped: Option<Address>,
}

impl ScriptHashScript {
    pub fn encode(&self) -> [u8; SCRIPTHASH_SCRIPT_SIZE] {
        let mut out = [0u8; SCRIPTHASH_SCRIPT_SIZE];
        out[..SCRIPT_HEADER_SIZE].copy_from_slice(&self.header.encode());
        out[12..44].copy_from_slice(&self.hash);
        if let Some(wrapped) = self.wrapped {
            out[44..48].copy_from_slice(&wrapped.script_num.to_le_bytes());
            out[48] = wrapped.address_type.tag();
        }
        out
    }

    fn decode(b: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&b[12..44]);
        let script_num = le_u32(b, 44);
        let wrapped = match (script_num, AddressType::from_tag(b[48])) {
            (0, _) | (_, None) => None,
            (num, Some(t)) => Some(Address::new(num, t)),
        };
        Self {
            header: ScriptHeader::decode(b),
            hash,
            wrapped,
        }
    }
}

/// An m-of-n multisig script over pubkey scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigScript {
    pub header: ScriptHeader,
    pub required: u8,
    pub total: u8,
    /// Pubkey script numbers of the participating keys.
    pub members: Vec<u32>,
}

impl MultisigScript {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SCRIPT_HEADER_SIZE + 4 + self.members.len() * 4);
        out.extend_from_slice(&self.header.encode());
        out.push(self.required);
        out.push(self.total);
        out.extend_from_slice(&(self.members.len() as u16).to_le_bytes());
        for m in &self.members {
            out.extend_from_slice(&m.to_le_bytes());
        }
        out
    }

    fn decode(b: &[u8], offset: u64) -> Result<Self, StoreError> {
        if b.len() < SCRIPT_HEADER_SIZE + 4 {
            return Err(short_record(offset, b.len()));
        }
        let count = usize::from(le_u16(b, 14));
        if b.len() < SCRIPT_HEADER_SIZE + 4 + count * 4 {
            return Err(short_record(offset, b.len()));
        }
        let members = (0..count).map(|i| le_u32(b, 16 + i * 4)).collect();
        Ok(Self {
            header: ScriptHeader::decode(b),
            required: b[12],
            total: b[13],
            members,
        })
    }

    /// Addresses of the member keys.
    pub fn member_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.members
            .iter()
            .map(|num| Address::new(*num, AddressType::MultisigPubkey))
    }
}

/// A nonstandard or null-data script: raw bytes behind a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataScript<'a> {
    pub header: ScriptHeader,
    pub data: &'a [u8],
}

impl<'a> DataScript<'a> {
    pub fn encode(header: &ScriptHeader, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(SCRIPT_HEADER_SIZE + 4 + data.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    fn decode(b: &'a [u8], offset: u64) -> Result<Self, StoreError> {
        if b.len() < SCRIPT_HEADER_SIZE + 4 {
            return Err(short_record(offset, b.len()));
        }
        let len = le_u32(b, 12) as usize;
        let data = b
            .get(16..16 + len)
            .ok_or_else(|| short_record(offset, b.len()))?;
        Ok(Self {
            header: ScriptHeader::decode(b),
            data,
        })
    }
}

fn short_record(offset: u64, len: usize) -> StoreError {
    StoreError::CorruptRecord {
        offset,
        reason: format!("script record of {len} bytes is shorter than its fields"),
    }
}

// --- Store ---

#[derive(Debug)]
enum ScriptFile {
    Fixed(FixedFile),
    Indexed(IndexedFile),
}

impl ScriptFile {
    fn count(&self) -> u64 {
        match self {
            Self::Fixed(f) => f.count(),
            Self::Indexed(f) => f.count(),
        }
    }

    fn get(&self, index: u64) -> Result<Option<&[u8]>, StoreError> {
        match self {
            Self::Fixed(f) => Ok(f.get(index)),
            Self::Indexed(f) => f.get(index),
        }
    }

    fn reload(&mut self) -> Result<bool, StoreError> {
        match self {
            Self::Fixed(f) => f.reload(),
            Self::Indexed(f) => f.reload(),
        }
    }
}

/// Fixed record size for `dedup`, or `None` for variable-length kinds.
pub fn fixed_script_size(dedup: DedupAddressType) -> Option<usize> {
    match dedup {
        DedupAddressType::Pubkey => Some(PUBKEY_SCRIPT_SIZE),
        DedupAddressType::ScriptHash => Some(SCRIPTHASH_SCRIPT_SIZE),
        DedupAddressType::Multisig | DedupAddressType::Nonstandard | DedupAddressType::NullData => None,
    }
}

/// Read access to every script file.
#[derive(Debug)]
pub struct ScriptAccess {
    files: Vec<ScriptFile>,
}

impl ScriptAccess {
    pub fn open(config: &DataConfig) -> Result<Self, StoreError> {
        let files = DedupAddressType::ALL
            .iter()
            .map(|dedup| match fixed_script_size(*dedup) {
                Some(stride) => FixedFile::open_or_create(config.script_file(*dedup), stride).map(ScriptFile::Fixed),
                None => IndexedFile::open_or_create(config.scripts_dir(), dedup.name()).map(ScriptFile::Indexed),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let access = Self { files };
        tracing::info!(
            total = access.total_count(),
            path = %config.scripts_dir().display(),
            "opened script store"
        );
        Ok(access)
    }

    pub fn reload(&mut self) -> Result<(), StoreError> {
        for file in &mut self.files {
            file.reload()?;
        }
        Ok(())
    }

    fn file(&self, dedup: DedupAddressType) -> &ScriptFile {
        &self.files[dedup.index()]
    }

    /// Number of scripts of `dedup` type; valid script numbers are `1..=count`.
    pub fn count(&self, dedup: DedupAddressType) -> u32 {
        u32::try_from(self.file(dedup).count()).unwrap_or(u32::MAX)
    }

    /// Scripts across every dedup type.
    pub fn total_count(&self) -> u64 {
        DedupAddressType::ALL
            .iter()
            .map(|d| u64::from(self.count(*d)))
            .sum()
    }

    fn record(&self, dedup: DedupAddressType, script_num: u32) -> Result<&[u8], LedgerError> {
        let count = self.count(dedup);
        if script_num == 0 || script_num > count {
            return Err(ChainError::out_of_range("script", script_num, count).into());
        }
        self.file(dedup)
            .get(u64::from(script_num - 1))?
            .ok_or_else(|| ChainError::out_of_range("script", script_num, count).into())
    }

    /// Full stored record of a script, header included.
    pub fn raw(&self, dedup: DedupAddressType, script_num: u32) -> Result<&[u8], LedgerError> {
        self.record(dedup, script_num)
    }

    pub fn header(&self, dedup: DedupAddressType, script_num: u32) -> Result<ScriptHeader, LedgerError> {
        let record = self.record(dedup, script_num)?;
        if record.len() < SCRIPT_HEADER_SIZE {
            return Err(short_record(u64::from(script_num), record.len()).into());
        }
        Ok(ScriptHeader::decode(record))
    }

    pub fn pubkey(&self, script_num: u32) -> Result<PubkeyScript, LedgerError> {
        Ok(PubkeyScript::decode(self.record(DedupAddressType::Pubkey, script_num)?))
    }

    pub fn scripthash(&self, script_num: u32) -> Result<ScriptHashScript, LedgerError> {
        Ok(ScriptHashScript::decode(self.record(DedupAddressType::ScriptHash, script_num)?))
    }

    pub fn multisig(&self, script_num: u32) -> Result<MultisigScript, LedgerError> {
        let record = self.record(DedupAddressType::Multisig, script_num)?;
        Ok(MultisigScript::decode(record, u64::from(script_num))?)
    }

    pub fn nonstandard(&self, script_num: u32) -> Result<DataScript<'_>, LedgerError> {
        let record = self.record(DedupAddressType::Nonstandard, script_num)?;
        Ok(DataScript::decode(record, u64::from(script_num))?)
    }

    pub fn null_data(&self, script_num: u32) -> Result<DataScript<'_>, LedgerError> {
        let record = self.record(DedupAddressType::NullData, script_num)?;
        Ok(DataScript::decode(record, u64::from(script_num))?)
    }
}

impl WrappedAddressResolver for ScriptAccess {
    fn resolve_wrapped(&self, script_num: u32) -> Result<Option<Address>, LedgerError> {
        Ok(self.scripthash(script_num)?.wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::writer::ScriptWriter;

    fn setup() -> (tempfile::TempDir, DataConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::create(dir.path(), ChainConfig::default()).unwrap();
        (dir, config)
    }

    #[test]
    fn header_layout() {
        let header = ScriptHeader {
            tx_first_seen: 3,
            tx_first_spent: None,
            types_seen: 0,
        }
        .with_type(AddressType::PubkeyHash)
        .with_type(AddressType::WitnessPubkeyHash);
        let bytes = header.encode();
        assert_eq!(&bytes[4..8], &[0xff; 4]);
        assert_eq!(ScriptHeader::decode(&bytes), header);
        let seen: Vec<_> = header.seen_types().collect();
        assert_eq!(seen, vec![AddressType::PubkeyHash, AddressType::WitnessPubkeyHash]);
    }

    #[test]
    fn empty_store_has_no_scripts() {
        let (_dir, config) = setup();
        let scripts = ScriptAccess::open(&config).unwrap();
        assert_eq!(scripts.total_count(), 0);
        assert!(scripts.header(DedupAddressType::Pubkey, 1).is_err());
    }

    #[test]
    fn scripts_are_one_based_per_type() {
        let (_dir, config) = setup();
        let mut writer = ScriptWriter::open(&config).unwrap();
        let key = [7u8; 65];
        assert_eq!(writer.append_pubkey(ScriptHeader::new(0), Some(key)).unwrap(), 1);
        assert_eq!(writer.append_pubkey(ScriptHeader::new(1), None).unwrap(), 2);
        assert_eq!(writer.append_null_data(ScriptHeader::new(1), b"hello").unwrap(), 1);
        writer.flush().unwrap();

        let scripts = ScriptAccess::open(&config).unwrap();
        assert_eq!(scripts.count(DedupAddressType::Pubkey), 2);
        assert_eq!(scripts.count(DedupAddressType::NullData), 1);
        assert_eq!(scripts.pubkey(1).unwrap().pubkey, Some(key));
        assert_eq!(scripts.pubkey(2).unwrap().pubkey, None);
        assert_eq!(scripts.null_data(1).unwrap().data, b"hello");
        assert_eq!(scripts.raw(DedupAddressType::Pubkey, 1).unwrap().len(), PUBKEY_SCRIPT_SIZE);
        assert!(matches!(
            scripts.pubkey(0),
            Err(LedgerError::Chain(ChainError::OutOfRange { .. }))
        ));
        assert!(scripts.pubkey(3).is_err());
    }

    #[test]
    fn wrapped_address_resolution() {
        let (_dir, config) = setup();
        let mut writer = ScriptWriter::open(&config).unwrap();
        let inner = Address::new(4, AddressType::WitnessPubkeyHash);
        writer.append_scripthash(ScriptHeader::new(0), [1; 32], Some(inner)).unwrap();
        writer.append_scripthash(ScriptHeader::new(0), [2; 32], None).unwrap();
        writer.flush().unwrap();

        let scripts = ScriptAccess::open(&config).unwrap();
        assert_eq!(scripts.resolve_wrapped(1).unwrap(), Some(inner));
        assert_eq!(scripts.resolve_wrapped(2).unwrap(), None);
        assert_eq!(scripts.scripthash(2).unwrap().hash, [2; 32]);
    }

    #[test]
    fn multisig_members() {
        let (_dir, config) = setup();
        let mut writer = ScriptWriter::open(&config).unwrap();
        writer.append_multisig(ScriptHeader::new(0), 2, &[1, 2, 3]).unwrap();
        writer.flush().unwrap();

        let scripts = ScriptAccess::open(&config).unwrap();
        let ms = scripts.multisig(1).unwrap();
        assert_eq!((ms.required, ms.total), (2, 3));
        assert_eq!(ms.members, vec![1, 2, 3]);
        assert_eq!(ms.member_addresses().count(), 3);
    }

    #[test]
    fn reload_sees_new_scripts() {
        let (_dir, config) = setup();
        let mut scripts = ScriptAccess::open(&config).unwrap();
        let mut writer = ScriptWriter::open(&config).unwrap();
        writer.append_nonstandard(ScriptHeader::new(0), &[0x51]).unwrap();
        writer.flush().unwrap();
        assert_eq!(scripts.count(DedupAddressType::Nonstandard), 0);
        scripts.reload().unwrap();
        assert_eq!(scripts.nonstandard(1).unwrap().data, &[0x51]);
    }
}
