//! Cross-crate test suite for ledgerscope.
//!
//! Integration tests build small ledgers with the store's own writers, then
//! check traversal, map-reduce and clustering invariants against naive
//! sequential references.

pub mod helpers;
