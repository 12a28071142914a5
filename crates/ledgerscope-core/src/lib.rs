//! # ledgerscope-core
//! Data model shared by every ledgerscope crate: on-disk record layouts,
//! address and script identities, pointers, and the error taxonomy.

pub mod address;
pub mod constants;
pub mod error;
pub mod records;
pub mod traits;
pub mod types;
