//! Trait interfaces between the store and the analyses built on it.

use crate::address::Address;
use crate::error::LedgerError;

/// Resolves the address a scripthash wraps, one level deep.
///
/// Implemented by the script store; clustering consumes it to link a P2SH
/// script with the script it redeems to.
pub trait WrappedAddressResolver: Sync {
    /// Wrapped address of scripthash script `script_num`, or `None` if the
    /// redeem script was never revealed.
    fn resolve_wrapped(&self, script_num: u32) -> Result<Option<Address>, LedgerError>;
}

impl<F> WrappedAddressResolver for F
where
    F: Fn(u32) -> Option<Address> + Sync,
{
    fn resolve_wrapped(&self, script_num: u32) -> Result<Option<Address>, LedgerError> {
        Ok(self(script_num))
    }
}
