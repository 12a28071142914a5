//! Dense numbering of every script identity.
//!
//! Forest slot `i` belongs to the dedup type whose range `starts[t]..starts[t+1]`
//! contains it; within a type, slot `starts[t] + scriptNum - 1`.

use ledgerscope_core::address::{DedupAddress, DedupAddressType};
use ledgerscope_core::error::ClusterError;
use ledgerscope_store::ScriptAccess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    starts: [u32; DedupAddressType::COUNT + 1],
}

impl AddressLayout {
    /// Build from per-type script counts in dedup tag order.
    pub fn from_counts(counts: [u32; DedupAddressType::COUNT]) -> Result<Self, ClusterError> {
        let mut starts = [0u32; DedupAddressType::COUNT + 1];
        for (i, count) in counts.iter().enumerate() {
            starts[i + 1] = starts[i].checked_add(*count).ok_or_else(|| {
                ClusterError::Inconsistent(format!("more than {} script identities", u32::MAX))
            })?;
        }
        Ok(Self { starts })
    }

    pub fn new(scripts: &ScriptAccess) -> Result<Self, ClusterError> {
        Self::from_counts(DedupAddressType::ALL.map(|d| scripts.count(d)))
    }

    /// Total number of slots.
    pub fn total(&self) -> u32 {
        self.starts[DedupAddressType::COUNT]
    }

    pub fn start(&self, dedup: DedupAddressType) -> u32 {
        self.starts[dedup.index()]
    }

    pub fn count(&self, dedup: DedupAddressType) -> u32 {
        self.starts[dedup.index() + 1] - self.starts[dedup.index()]
    }

    pub fn index_of(&self, address: DedupAddress) -> Result<u32, ClusterError> {
        let count = self.count(address.dedup_type);
        if address.script_num == 0 || address.script_num > count {
            return Err(ClusterError::UnknownAddress(address.to_string()));
        }
        Ok(self.start(address.dedup_type) + address.script_num - 1)
    }

    /// Inverse of [`index_of`](Self::index_of).
    pub fn address_at(&self, index: u32) -> Option<DedupAddress> {
        DedupAddressType::ALL
            .into_iter()
            .find(|d| index >= self.start(*d) && index < self.start(*d) + self.count(*d))
            .map(|d| DedupAddress::new(index - self.start(d) + 1, d))
    }
}
