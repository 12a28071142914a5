//! Error types for ledgerscope.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())] MissingConfig(PathBuf),
    #[error("malformed config {}: {reason}", path.display())] Malformed { path: PathBuf, reason: String },
    #[error("data format version {found} is incompatible, expected {expected}")] VersionMismatch { found: u32, expected: u32 },
    #[error("required directory missing: {}", .0.display())] MissingDirectory(PathBuf),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error on {}: {source}", path.display())] Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("{} has length {len}, not a multiple of record size {stride}", path.display())] Misaligned { path: PathBuf, len: u64, stride: usize },
    #[error("truncated record at offset {offset}: needs {needed} bytes, {available} mapped")] TruncatedRecord { offset: u64, needed: u64, available: u64 },
    #[error("corrupt record at offset {offset}: {reason}")] CorruptRecord { offset: u64, reason: String },
    #[error("{} shrank from {old} to {new} bytes while mapped", path.display())] Shrunk { path: PathBuf, old: u64, new: u64 },
    #[error("offset index covers {indexed} transactions but blocks declare {declared}")] IndexMismatch { indexed: u64, declared: u64 },
    #[error("{field} value {value} does not fit its record field")] FieldOverflow { field: &'static str, value: u64 },
}

impl StoreError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn overflow(field: &'static str, value: impl TryInto<u64>) -> Self {
        Self::FieldOverflow {
            field,
            value: value.try_into().unwrap_or(u64::MAX),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("{what} {index} out of range (bound {bound})")] OutOfRange { what: &'static str, index: u64, bound: u64 },
    #[error("reorg detected at height {height}: expected tip {expected}, found {found}")] ReorgDetected { height: u32, expected: String, found: String },
}

impl ChainError {
    pub fn out_of_range(what: &'static str, index: impl Into<u64>, bound: impl Into<u64>) -> Self {
        Self::OutOfRange { what, index: index.into(), bound: bound.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster output already exists in {}; pass overwrite to replace it", .0.display())] OutputExists(PathBuf),
    #[error("cluster output path is not a directory: {}", .0.display())] NotADirectory(PathBuf),
    #[error("missing cluster file: {}", .0.display())] MissingFile(PathBuf),
    #[error("cluster {id} out of range ({count} clusters)")] UnknownCluster { id: u32, count: u32 },
    #[error("address {0} is not covered by the clustering")] UnknownAddress(String),
    #[error("cluster files disagree: {0}")] Inconsistent(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)] Config(#[from] ConfigError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Cluster(#[from] ClusterError),
}

impl LedgerError {
    /// True when the caller must reload or rebuild indices before continuing.
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::Chain(ChainError::ReorgDetected { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_message() {
        let err = ChainError::out_of_range("height", 12u32, 10u32);
        assert_eq!(err.to_string(), "height 12 out of range (bound 10)");
    }

    #[test]
    fn reorg_is_distinguished() {
        let err: LedgerError = ChainError::ReorgDetected {
            height: 3,
            expected: "aa".into(),
            found: "bb".into(),
        }
        .into();
        assert!(err.is_reorg());

        let other: LedgerError = ChainError::out_of_range("tx", 1u32, 0u32).into();
        assert!(!other.is_reorg());
    }

    #[test]
    fn store_error_keeps_path() {
        let err = StoreError::io("/tmp/x", std::io::Error::other("boom"));
        assert!(err.to_string().contains("/tmp/x"));
    }
}
