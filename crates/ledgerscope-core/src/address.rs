//! Address types and their deduplicated script identities.
//!
//! An [`Address`] names a script by `(scriptNum, AddressType)`. Several
//! address types can encode the same underlying script (a key spent as
//! P2PK, P2PKH and P2WPKH), so each maps onto one [`DedupAddressType`]
//! whose script numbers form a dense, 1-based space.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::DEDUP_ADDRESS_SIZE;

/// Address type tag as stored in the top 4 bits of an in/out entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AddressType {
    Nonstandard = 0,
    Pubkey = 1,
    PubkeyHash = 2,
    MultisigPubkey = 3,
    ScriptHash = 4,
    Multisig = 5,
    NullData = 6,
    WitnessPubkeyHash = 7,
    WitnessScriptHash = 8,
}

impl AddressType {
    pub const ALL: [AddressType; 9] = [
        Self::Nonstandard,
        Self::Pubkey,
        Self::PubkeyHash,
        Self::MultisigPubkey,
        Self::ScriptHash,
        Self::Multisig,
        Self::NullData,
        Self::WitnessPubkeyHash,
        Self::WitnessScriptHash,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nonstandard => "nonstandard",
            Self::Pubkey => "pubkey",
            Self::PubkeyHash => "pubkeyhash",
            Self::MultisigPubkey => "multisig_pubkey",
            Self::ScriptHash => "scripthash",
            Self::Multisig => "multisig",
            Self::NullData => "nulldata",
            Self::WitnessPubkeyHash => "witness_pubkeyhash",
            Self::WitnessScriptHash => "witness_scripthash",
        }
    }

    /// The canonical script identity this address type collapses onto.
    pub fn dedup_type(self) -> DedupAddressType {
        match self {
            Self::Pubkey | Self::PubkeyHash | Self::MultisigPubkey | Self::WitnessPubkeyHash => {
                DedupAddressType::Pubkey
            }
            Self::ScriptHash | Self::WitnessScriptHash => DedupAddressType::ScriptHash,
            Self::Multisig => DedupAddressType::Multisig,
            Self::NullData => DedupAddressType::NullData,
            Self::Nonstandard => DedupAddressType::Nonstandard,
        }
    }

    /// Bit for this type in a script's `typesSeen` mask.
    pub fn bit(self) -> u32 {
        1 << self.tag()
    }

    pub fn is_spendable(self) -> bool {
        self.dedup_type().is_spendable()
    }

    pub fn is_segwit(self) -> bool {
        matches!(self, Self::WitnessPubkeyHash | Self::WitnessScriptHash)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deduplicated script identity. The declaration order fixes the layout of
/// the clustering forest.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DedupAddressType {
    Nonstandard = 0,
    Pubkey = 1,
    ScriptHash = 2,
    Multisig = 3,
    NullData = 4,
}

impl DedupAddressType {
    pub const ALL: [DedupAddressType; 5] = [
        Self::Nonstandard,
        Self::Pubkey,
        Self::ScriptHash,
        Self::Multisig,
        Self::NullData,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn index(self) -> usize {
        usize::from(self.tag())
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// File stem used for the script store and the cluster index.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nonstandard => "nonstandard_script",
            Self::Pubkey => "pubkey_script",
            Self::ScriptHash => "scripthash_script",
            Self::Multisig => "multisig_script",
            Self::NullData => "null_data_script",
        }
    }

    /// All address types that collapse onto this identity.
    pub fn address_types(self) -> impl Iterator<Item = AddressType> {
        AddressType::ALL
            .into_iter()
            .filter(move |t| t.dedup_type() == self)
    }

    pub fn is_spendable(self) -> bool {
        !matches!(self, Self::NullData)
    }
}

impl fmt::Display for DedupAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A script viewed through one address encoding.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// 1-based script number within the type's dedup space.
    pub script_num: u32,
    pub address_type: AddressType,
}

impl Address {
    pub fn new(script_num: u32, address_type: AddressType) -> Self {
        Self { script_num, address_type }
    }

    pub fn dedup(self) -> DedupAddress {
        DedupAddress::new(self.script_num, self.address_type.dedup_type())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.address_type, self.script_num)
    }
}

/// Canonical script identity: `(scriptNum, dedupType)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupAddress {
    pub script_num: u32,
    pub dedup_type: DedupAddressType,
}

impl DedupAddress {
    pub fn new(script_num: u32, dedup_type: DedupAddressType) -> Self {
        Self { script_num, dedup_type }
    }

    /// Serialize as `u32 scriptNum`, `u8 tag`, 3 zero bytes.
    pub fn to_bytes(self) -> [u8; DEDUP_ADDRESS_SIZE] {
        let mut out = [0u8; DEDUP_ADDRESS_SIZE];
        out[..4].copy_from_slice(&self.script_num.to_le_bytes());
        out[4] = self.dedup_type.tag();
        out
    }

    /// Parse an entry written by [`to_bytes`](Self::to_bytes). Returns `None`
    /// for an unknown tag.
    pub fn from_bytes(bytes: &[u8; DEDUP_ADDRESS_SIZE]) -> Option<Self> {
        let script_num = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        DedupAddressType::from_tag(bytes[4]).map(|t| Self::new(script_num, t))
    }
}

impl fmt::Display for DedupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.dedup_type, self.script_num)
    }
}

impl From<Address> for DedupAddress {
    fn from(address: Address) -> Self {
        address.dedup()
    }
}
