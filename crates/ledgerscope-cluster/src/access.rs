//! Read side of a serialized clustering.
//!
//! All three file kinds are memory-mapped; lookups touch one index entry,
//! membership enumeration one contiguous run of the member file.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use ledgerscope_core::address::{AddressType, DedupAddress, DedupAddressType};
use ledgerscope_core::constants::{
    CLUSTER_ADDRESSES_FILE, CLUSTER_INDEX_SUFFIX, CLUSTER_OFFSETS_FILE, DEDUP_ADDRESS_SIZE,
};
use ledgerscope_core::error::{ClusterError, LedgerError};
use ledgerscope_core::records::le_u32;
use ledgerscope_store::ScriptAccess;
use ledgerscope_store::file_mapper::FixedFile;

pub fn offsets_path(dir: &Path) -> PathBuf {
    dir.join(CLUSTER_OFFSETS_FILE)
}

pub fn addresses_path(dir: &Path) -> PathBuf {
    dir.join(CLUSTER_ADDRESSES_FILE)
}

/// `<dedup name>_cluster_index.dat`
pub fn index_path(dir: &Path, dedup: DedupAddressType) -> PathBuf {
    dir.join(format!("{}{CLUSTER_INDEX_SUFFIX}", dedup.name()))
}

/// Every file a clustering consists of.
pub fn file_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths = vec![offsets_path(dir), addresses_path(dir)];
    paths.extend(DedupAddressType::ALL.iter().map(|d| index_path(dir, *d)));
    paths
}

fn open_required(path: PathBuf, stride: usize) -> Result<FixedFile, LedgerError> {
    match FixedFile::open_existing(&path, stride)? {
        Some(file) => Ok(file),
        None => Err(ClusterError::MissingFile(path).into()),
    }
}

/// Query handle over a clustering directory.
#[derive(Debug)]
pub struct ClusterAccess {
    dir: PathBuf,
    offsets: FixedFile,
    addresses: FixedFile,
    indexes: Vec<FixedFile>,
}

impl ClusterAccess {
    /// Map a clustering written by [`ClusterBuilder`](crate::ClusterBuilder).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        let offsets = open_required(offsets_path(&dir), 4)?;
        let addresses = open_required(addresses_path(&dir), DEDUP_ADDRESS_SIZE)?;
        let indexes = DedupAddressType::ALL
            .iter()
            .map(|d| open_required(index_path(&dir, *d), 4))
            .collect::<Result<Vec<_>, _>>()?;
        let access = Self {
            dir,
            offsets,
            addresses,
            indexes,
        };
        access.validate()?;
        tracing::info!(
            clusters = access.cluster_count(),
            addresses = access.address_count(),
            path = %access.dir.display(),
            "opened clustering"
        );
        Ok(access)
    }

    fn validate(&self) -> Result<(), ClusterError> {
        if self.offsets.count() == 0 || self.offset(0) != 0 {
            return Err(ClusterError::Inconsistent("offsets must start at 0".into()));
        }
        for i in 1..=self.cluster_count() {
            let (prev, next) = (self.offset(i - 1), self.offset(i));
            if next < prev {
                return Err(ClusterError::Inconsistent(format!(
                    "offset {i} is {next}, below the preceding {prev}"
                )));
            }
        }
        let last = self.offset(self.cluster_count());
        if u64::from(last) != self.addresses.count() {
            return Err(ClusterError::Inconsistent(format!(
                "offsets cover {last} members, member file holds {}",
                self.addresses.count()
            )));
        }
        let indexed: u64 = self.indexes.iter().map(FixedFile::count).sum();
        if indexed != self.addresses.count() {
            return Err(ClusterError::Inconsistent(format!(
                "index files cover {indexed} scripts, member file holds {}",
                self.addresses.count()
            )));
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cluster_count(&self) -> u32 {
        self.offsets.count().saturating_sub(1) as u32
    }

    pub fn address_count(&self) -> u64 {
        self.addresses.count()
    }

    fn offset(&self, index: u32) -> u32 {
        self.offsets.get(u64::from(index)).map_or(0, |b| le_u32(b, 0))
    }

    fn member(&self, position: u32) -> Option<DedupAddress> {
        let bytes: &[u8; DEDUP_ADDRESS_SIZE] = self.addresses.get(u64::from(position))?.try_into().ok()?;
        DedupAddress::from_bytes(bytes)
    }

    fn check_id(&self, id: u32) -> Result<(), ClusterError> {
        let count = self.cluster_count();
        if id >= count {
            return Err(ClusterError::UnknownCluster { id, count });
        }
        Ok(())
    }

    /// Cluster holding `address`.
    pub fn cluster_of(&self, address: impl Into<DedupAddress>) -> Result<u32, ClusterError> {
        let address = address.into();
        let entry = address
            .script_num
            .checked_sub(1)
            .and_then(|i| self.indexes[address.dedup_type.index()].get(u64::from(i)))
            .ok_or_else(|| ClusterError::UnknownAddress(address.to_string()))?;
        let id = le_u32(entry, 0);
        if id >= self.cluster_count() {
            return Err(ClusterError::Inconsistent(format!("{address} maps to missing cluster {id}")));
        }
        Ok(id)
    }

    pub fn cluster(&self, id: u32) -> Result<Cluster<'_>, ClusterError> {
        self.check_id(id)?;
        Ok(Cluster {
            access: self,
            id,
            start: self.offset(id),
            end: self.offset(id + 1),
        })
    }

    pub fn members_of(&self, id: u32) -> Result<Vec<DedupAddress>, ClusterError> {
        Ok(self.cluster(id)?.addresses().collect())
    }

    pub fn cluster_size(&self, id: u32) -> Result<u32, ClusterError> {
        Ok(self.cluster(id)?.size())
    }

    pub fn clusters(&self) -> impl Iterator<Item = Cluster<'_>> + '_ {
        (0..self.cluster_count()).map(move |id| Cluster {
            access: self,
            id,
            start: self.offset(id),
            end: self.offset(id + 1),
        })
    }

    /// Size of every cluster, indexed by id.
    pub fn cluster_sizes(&self) -> Vec<u32> {
        self.clusters().map(|c| c.size()).collect()
    }

    /// The `n` biggest clusters, largest first; equal sizes by ascending id.
    pub fn largest_clusters(&self, n: usize) -> Vec<Cluster<'_>> {
        let mut clusters: Vec<_> = self.clusters().collect();
        clusters.sort_by(|a, b| b.size().cmp(&a.size()).then(a.id.cmp(&b.id)));
        clusters.truncate(n);
        clusters
    }

    /// Clusters containing at least one tagged address, with their tags,
    /// in ascending id order.
    pub fn tagged_clusters<'t>(
        &self,
        tags: &'t HashMap<DedupAddress, String>,
    ) -> Result<Vec<TaggedCluster<'_, 't>>, ClusterError> {
        let mut by_cluster: BTreeMap<u32, Vec<(DedupAddress, &'t str)>> = BTreeMap::new();
        for (address, tag) in tags {
            let id = self.cluster_of(*address)?;
            by_cluster.entry(id).or_default().push((*address, tag.as_str()));
        }
        by_cluster
            .into_iter()
            .map(|(id, mut tagged)| {
                tagged.sort_unstable();
                Ok(TaggedCluster {
                    cluster: self.cluster(id)?,
                    tagged,
                })
            })
            .collect()
    }
}

/// One cluster: a contiguous run of the member file.
#[derive(Clone, Copy)]
pub struct Cluster<'c> {
    access: &'c ClusterAccess,
    id: u32,
    start: u32,
    end: u32,
}

impl<'c> Cluster<'c> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> u32 {
        self.end - self.start
    }

    pub fn addresses(&self) -> impl Iterator<Item = DedupAddress> + 'c {
        let access = self.access;
        (self.start..self.end).filter_map(move |p| access.member(p))
    }

    pub fn contains(&self, address: impl Into<DedupAddress>) -> bool {
        self.access.cluster_of(address).is_ok_and(|id| id == self.id)
    }

    /// Members of `address_type`'s dedup space that were seen as that type.
    pub fn count_of_type(&self, scripts: &ScriptAccess, address_type: AddressType) -> Result<u32, LedgerError> {
        let mut count = 0;
        for member in self.addresses().filter(|a| a.dedup_type == address_type.dedup_type()) {
            if scripts.header(member.dedup_type, member.script_num)?.seen(address_type) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Size counting each member once per address type it appeared as.
    pub fn type_equiv_size(&self, scripts: &ScriptAccess) -> Result<u64, LedgerError> {
        let mut size = 0;
        for member in self.addresses() {
            size += scripts.header(member.dedup_type, member.script_num)?.seen_types().count() as u64;
        }
        Ok(size)
    }

    /// Members carrying a tag, in member order.
    pub fn tagged_addresses<'t>(&self, tags: &'t HashMap<DedupAddress, String>) -> Vec<(DedupAddress, &'t str)> {
        self.addresses()
            .filter_map(|a| tags.get(&a).map(|tag| (a, tag.as_str())))
            .collect()
    }
}

impl PartialEq for Cluster<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.access, other.access)
    }
}

impl Eq for Cluster<'_> {}

impl fmt::Debug for Cluster<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster").field("id", &self.id).field("size", &self.size()).finish()
    }
}

/// A cluster together with the tagged addresses found in it.
#[derive(Debug, Clone)]
pub struct TaggedCluster<'c, 't> {
    pub cluster: Cluster<'c>,
    pub tagged: Vec<(DedupAddress, &'t str)>,
}
