//! # ledgerscope-chain
//!
//! Typed, zero-copy views over the record store:
//!
//! - [`Block`], [`Transaction`], [`Input`], [`Output`]: cursors borrowing
//!   the mapped records
//! - [`BlockRange`], [`TransactionRange`]: half-open ranges with
//!   transaction-count balanced [`segment`](BlockRange::segment)ing
//! - [`parallel`]: fork-join map-reduce over segments
//! - [`heuristics`]: change-output and coinjoin predicates

pub mod block;
pub mod heuristics;
pub mod parallel;
pub mod range;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testutil;

pub use block::Block;
pub use parallel::Parallelism;
pub use range::{BlockRange, Blocks, TransactionRange, Transactions, TxCursor};
pub use transaction::{Input, Inputs, Output, Outputs, Transaction};
