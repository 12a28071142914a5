//! Format constants. All sizes in bytes, all integers little-endian.

/// On-disk data format version accepted by this build.
pub const DATA_FORMAT_VERSION: u32 = 5;

/// Size of one block header record, including trailing padding.
pub const BLOCK_RECORD_SIZE: usize = 88;

/// Size of the fixed transaction header that precedes the in/out array.
pub const TX_HEADER_SIZE: usize = 16;

/// Size of one packed input or output entry.
pub const INOUT_SIZE: usize = 16;

/// Size of one entry in the per-transaction byte offset index.
pub const TX_OFFSET_SIZE: usize = 8;

/// Number of low bits of the packed `other` field holding the value.
pub const VALUE_BITS: u32 = 60;

/// Mask selecting the value from the packed `other` field.
pub const VALUE_MASK: u64 = (1 << VALUE_BITS) - 1;

/// Largest value representable in an in/out entry.
pub const MAX_VALUE: u64 = VALUE_MASK;

/// Size of the shared script header (first seen, first spent, types seen).
pub const SCRIPT_HEADER_SIZE: usize = 12;

/// Fixed record size of a pubkey script.
pub const PUBKEY_SCRIPT_SIZE: usize = 80;

/// Fixed record size of a scripthash script.
pub const SCRIPTHASH_SCRIPT_SIZE: usize = 52;

/// Size of a serialized [`DedupAddress`](crate::address::DedupAddress).
pub const DEDUP_ADDRESS_SIZE: usize = 8;

/// Marker stored in `txFirstSpent` for scripts that were never spent.
pub const NEVER_SPENT: u32 = u32::MAX;

/// Output values that wallets use for dust and that never identify a coinjoin.
pub const DUST_VALUES: [u64; 2] = [546, 2730];

/// Name of the data configuration file inside a data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Clustering output file holding `u32[K+1]` prefix sums.
pub const CLUSTER_OFFSETS_FILE: &str = "clusterOffsets.dat";

/// Clustering output file holding members ordered by cluster.
pub const CLUSTER_ADDRESSES_FILE: &str = "clusterAddresses.dat";

/// Suffix of the per-dedup-type cluster index files.
pub const CLUSTER_INDEX_SUFFIX: &str = "_cluster_index.dat";
