//! Batch clustering run.
//!
//! A run moves through five states, each logged with counts and elapsed
//! time:
//!
//! 1. **Unlinked**: one forest slot per script identity.
//! 2. **Linking**: unite each scripthash with the address it wraps, then
//!    every transaction's inputs (and, when the change heuristic names
//!    exactly one output, that output) with its first input.
//! 3. **Resolved**: every slot's root, paths flattened.
//! 4. **Remapped**: roots renumbered `0..K` in order of first occurrence.
//! 5. **Serialized**: offsets, members and per-type index files written to
//!    temporaries and renamed into place together.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use ledgerscope_chain::heuristics::{ChangeHeuristic, CoinjoinDetector, EqualValueCoinjoin, NoChange};
use ledgerscope_chain::{BlockRange, Transaction};
use ledgerscope_core::address::{DedupAddress, DedupAddressType};
use ledgerscope_core::error::{ClusterError, LedgerError, StoreError};
use ledgerscope_core::traits::WrappedAddressResolver;
use ledgerscope_store::DataAccess;

use crate::access::{addresses_path, file_paths, index_path, offsets_path};
use crate::disjoint_set::DisjointSet;
use crate::layout::AddressLayout;

/// Counts reported by a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusteringSummary {
    pub addresses: u32,
    /// Unions that merged two distinct clusters.
    pub links: u64,
    pub clusters: u32,
    pub largest_cluster: u32,
}

/// Configures and runs a clustering.
pub struct ClusterBuilder<'h> {
    change: Box<dyn ChangeHeuristic + 'h>,
    coinjoin: Box<dyn CoinjoinDetector + 'h>,
    resolver: Option<&'h dyn WrappedAddressResolver>,
    overwrite: bool,
    link_single_input_change: bool,
}

impl Default for ClusterBuilder<'_> {
    fn default() -> Self {
        Self {
            change: Box::new(NoChange),
            coinjoin: Box::new(EqualValueCoinjoin),
            resolver: None,
            overwrite: false,
            link_single_input_change: false,
        }
    }
}

impl<'h> ClusterBuilder<'h> {
    /// No change heuristic, equal-value coinjoin detection, wrapped
    /// addresses from the script store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change_heuristic(mut self, heuristic: impl ChangeHeuristic + 'h) -> Self {
        self.change = Box::new(heuristic);
        self
    }

    pub fn with_coinjoin_detector(mut self, detector: impl CoinjoinDetector + 'h) -> Self {
        self.coinjoin = Box::new(detector);
        self
    }

    /// Resolve scripthash wrapping through `resolver` instead of the script
    /// store.
    pub fn with_resolver(mut self, resolver: &'h dyn WrappedAddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace an existing clustering in the output directory.
    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    /// Also link change outputs of single-input transactions.
    ///
    /// Off by default: with it, one input and a change guess are enough to
    /// merge two addresses.
    pub fn link_single_input_change(mut self, enabled: bool) -> Self {
        self.link_single_input_change = enabled;
        self
    }

    /// Cluster every visible transaction of `data` and write the result to
    /// `out_dir`.
    pub fn build(&self, data: &DataAccess, out_dir: impl AsRef<Path>) -> Result<ClusteringSummary, LedgerError> {
        self.build_range(data, BlockRange::all(&data.chain), out_dir)
    }

    /// Cluster the transactions of `range`, a range over `data.chain`.
    /// Every script in the store still gets a cluster; addresses that only
    /// appear outside `range` stay singletons unless a scripthash wraps them.
    ///
    /// Nothing is renamed into place unless every file was written, and a
    /// previous clustering stays intact until then. A failed run may leave
    /// `.tmp` files behind and is not resumable.
    pub fn build_range(
        &self,
        data: &DataAccess,
        range: BlockRange<'_>,
        out_dir: impl AsRef<Path>,
    ) -> Result<ClusteringSummary, LedgerError> {
        let out_dir = out_dir.as_ref();
        prepare_output(out_dir, self.overwrite)?;
        let started = Instant::now();

        let layout = AddressLayout::new(&data.scripts)?;
        let forest = DisjointSet::new(layout.total());
        tracing::info!(state = "unlinked", addresses = layout.total(), "allocated cluster forest");

        let resolver: &dyn WrappedAddressResolver = match self.resolver {
            Some(resolver) => resolver,
            None => &data.scripts,
        };
        let nested = link_nested(resolver, &layout, &forest)?;
        tracing::info!(
            state = "linking",
            pass = "nested",
            links = nested,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "linked wrapped addresses"
        );

        let links = AtomicU64::new(0);
        range.try_for_each_tx(|tx| {
            let merged = self.link_transaction(&tx, &layout, &forest)?;
            links.fetch_add(merged, Ordering::Relaxed);
            Ok(())
        })?;
        let tx_links = links.into_inner();
        tracing::info!(
            state = "linking",
            pass = "transactions",
            links = tx_links,
            heights = ?(range.start()..range.stop()),
            txes = range.total_tx_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "linked transaction inputs"
        );

        let roots = forest.resolve();
        tracing::info!(
            state = "resolved",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flattened cluster forest"
        );

        let (cluster_ids, cluster_count) = remap(&roots);
        let offsets = prefix_offsets(&cluster_ids, cluster_count);
        tracing::info!(
            state = "remapped",
            clusters = cluster_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assigned dense cluster ids"
        );

        serialize(out_dir, &layout, &cluster_ids, &offsets)?;
        let summary = ClusteringSummary {
            addresses: layout.total(),
            links: nested + tx_links,
            clusters: cluster_count,
            largest_cluster: offsets.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0),
        };
        tracing::info!(
            state = "serialized",
            addresses = summary.addresses,
            links = summary.links,
            clusters = summary.clusters,
            largest = summary.largest_cluster,
            elapsed_ms = started.elapsed().as_millis() as u64,
            path = %out_dir.display(),
            "wrote clustering"
        );
        Ok(summary)
    }

    /// Apply the input and change rules to one transaction; returns the
    /// number of merges.
    fn link_transaction(
        &self,
        tx: &Transaction<'_>,
        layout: &AddressLayout,
        forest: &DisjointSet,
    ) -> Result<u64, LedgerError> {
        if tx.is_coinbase() || self.coinjoin.is_coinjoin(tx) {
            return Ok(0);
        }
        let mut inputs = tx.inputs();
        let Some(first) = inputs.next() else {
            return Ok(0);
        };
        let anchor = layout.index_of(first.address().dedup())?;
        let mut merged = 0;
        for input in inputs {
            merged += u64::from(forest.unite(anchor, layout.index_of(input.address().dedup())?));
        }
        if tx.input_count() >= 2 || self.link_single_input_change {
            if let Some(change) = self.change.unique_change(tx) {
                merged += u64::from(forest.unite(anchor, layout.index_of(change.address().dedup())?));
            }
        }
        Ok(merged)
    }
}

fn link_nested(
    resolver: &dyn WrappedAddressResolver,
    layout: &AddressLayout,
    forest: &DisjointSet,
) -> Result<u64, LedgerError> {
    (1..=layout.count(DedupAddressType::ScriptHash))
        .into_par_iter()
        .map(|script_num| -> Result<u64, LedgerError> {
            let Some(wrapped) = resolver.resolve_wrapped(script_num)? else {
                return Ok(0);
            };
            let outer = layout.index_of(DedupAddress::new(script_num, DedupAddressType::ScriptHash))?;
            let inner = layout.index_of(wrapped.dedup())?;
            Ok(u64::from(forest.unite(outer, inner)))
        })
        .try_reduce(|| 0, |a, b| Ok(a + b))
}

/// Dense ids in order of each cluster's first slot.
fn remap(roots: &[u32]) -> (Vec<u32>, u32) {
    let mut id_of_root = vec![u32::MAX; roots.len()];
    let mut next = 0u32;
    let ids = roots
        .iter()
        .map(|root| {
            let id = &mut id_of_root[*root as usize];
            if *id == u32::MAX {
                *id = next;
                next += 1;
            }
            *id
        })
        .collect();
    (ids, next)
}

/// `K + 1` prefix sums of cluster sizes, starting at 0.
fn prefix_offsets(cluster_ids: &[u32], cluster_count: u32) -> Vec<u32> {
    let mut offsets = vec![0u32; cluster_count as usize + 1];
    for id in cluster_ids {
        offsets[*id as usize + 1] += 1;
    }
    for i in 1..offsets.len() {
        offsets[i] += offsets[i - 1];
    }
    offsets
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_file(path: &Path, records: impl Iterator<Item = impl AsRef<[u8]>>) -> Result<(), StoreError> {
    let tmp = tmp_path(path);
    let file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    let mut out = BufWriter::new(file);
    for record in records {
        out.write_all(record.as_ref()).map_err(|e| StoreError::io(&tmp, e))?;
    }
    out.flush().map_err(|e| StoreError::io(&tmp, e))
}

fn serialize(dir: &Path, layout: &AddressLayout, cluster_ids: &[u32], offsets: &[u32]) -> Result<(), LedgerError> {
    let write_members = || {
        let mut cursor = offsets[..offsets.len() - 1].to_vec();
        let mut members = vec![[0u8; 8]; cluster_ids.len()];
        for dedup in DedupAddressType::ALL {
            let start = layout.start(dedup);
            for script_num in 1..=layout.count(dedup) {
                let id = cluster_ids[(start + script_num - 1) as usize] as usize;
                members[cursor[id] as usize] = DedupAddress::new(script_num, dedup).to_bytes();
                cursor[id] += 1;
            }
        }
        write_file(&addresses_path(dir), members.iter())
    };
    let write_indexes = || {
        DedupAddressType::ALL.par_iter().try_for_each(|dedup| {
            let start = layout.start(*dedup) as usize;
            let ids = &cluster_ids[start..start + layout.count(*dedup) as usize];
            write_file(&index_path(dir, *dedup), ids.iter().map(|id| id.to_le_bytes()))
        })
    };
    let (members, indexes) = rayon::join(write_members, write_indexes);
    members?;
    indexes?;
    write_file(&offsets_path(dir), offsets.iter().map(|o| o.to_le_bytes()))?;

    for path in file_paths(dir) {
        let tmp = tmp_path(&path);
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
    }
    Ok(())
}

/// Create `dir` if needed and refuse to replace a previous clustering
/// without `overwrite`. A replaced clustering is left in place; the final
/// renames swap every one of its files.
fn prepare_output(dir: &Path, overwrite: bool) -> Result<(), LedgerError> {
    if dir.exists() && !dir.is_dir() {
        return Err(ClusterError::NotADirectory(dir.to_path_buf()).into());
    }
    let existing = file_paths(dir).iter().filter(|p| p.exists()).count();
    if existing > 0 {
        if !overwrite {
            return Err(ClusterError::OutputExists(dir.to_path_buf()).into());
        }
        tracing::info!(existing, path = %dir.display(), "replacing previous clustering");
    }
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    Ok(())
}
