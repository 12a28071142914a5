//! # ledgerscope-store
//!
//! Append-only, memory-mapped storage for a parsed ledger:
//!
//! - [`file_mapper`]: mapped files with append-only `reload`
//! - [`chain`]: block headers and variable-length transaction records
//! - [`scripts`]: per-dedup-type script payloads
//! - [`config`]: data directory layout and format version
//! - [`writer`]: appenders producing the same formats
//!
//! [`DataAccess`] bundles the three read-side handles into the context
//! object every analysis takes by reference.

pub mod access;
pub mod chain;
pub mod config;
pub mod file_mapper;
pub mod scripts;
pub mod writer;

pub use access::DataAccess;
pub use chain::ChainAccess;
pub use config::{ChainConfig, DataConfig};
pub use scripts::ScriptAccess;
pub use writer::{ChainWriter, NewBlock, NewTransaction, ScriptWriter};
