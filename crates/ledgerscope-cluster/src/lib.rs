//! # ledgerscope-cluster
//!
//! Groups script identities into clusters of likely common ownership.
//!
//! - [`ClusterBuilder`]: links addresses by common inputs, scripthash
//!   wrapping and an optional change heuristic, then writes the partition
//! - [`ClusterAccess`]: memory-mapped `clusterOf` / `membersOf` queries
//!   over a written partition
//! - [`DisjointSet`]: the lock-striped union-find both passes share

pub mod access;
pub mod builder;
pub mod disjoint_set;
pub mod layout;

#[cfg(test)]
pub(crate) mod testutil;

pub use access::{Cluster, ClusterAccess, TaggedCluster};
pub use builder::{ClusterBuilder, ClusteringSummary};
pub use disjoint_set::DisjointSet;
pub use layout::AddressLayout;
