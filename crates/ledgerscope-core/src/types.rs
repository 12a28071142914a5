//! Identity types: block hashes and input/output pointers.
//!
//! Pointers order by `(tx_num, inout_num)`, which is chain order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte block hash as stored in the block record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hex rendering in display order (byte-reversed, as block explorers show it).
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Position of an input: the spending transaction and the input's index in it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputPointer {
    pub tx_num: u32,
    pub inout_num: u16,
}

/// Position of an output: the creating transaction and the output's index in it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputPointer {
    pub tx_num: u32,
    pub inout_num: u16,
}

impl InputPointer {
    pub fn new(tx_num: u32, inout_num: u16) -> Self {
        Self { tx_num, inout_num }
    }
}

impl OutputPointer {
    pub fn new(tx_num: u32, inout_num: u16) -> Self {
        Self { tx_num, inout_num }
    }
}

impl fmt::Display for InputPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputPointer({}:{})", self.tx_num, self.inout_num)
    }
}

impl fmt::Display for OutputPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputPointer({}:{})", self.tx_num, self.inout_num)
    }
}
