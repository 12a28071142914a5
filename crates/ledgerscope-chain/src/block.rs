//! Block view over a stored header record.

use std::fmt;

use chrono::{DateTime, Utc};

use ledgerscope_core::error::{ChainError, LedgerError};
use ledgerscope_core::records::BlockRecord;
use ledgerscope_core::types::Hash256;
use ledgerscope_store::ChainAccess;

use crate::range::TransactionRange;
use crate::transaction::Transaction;

/// A block at a fixed height.
#[derive(Clone, Copy)]
pub struct Block<'a> {
    chain: &'a ChainAccess,
    record: BlockRecord<'a>,
}

impl<'a> Block<'a> {
    pub fn new(chain: &'a ChainAccess, height: u32) -> Result<Self, LedgerError> {
        let record = chain.block(height)?;
        Ok(Self { chain, record })
    }

    pub fn chain(&self) -> &'a ChainAccess {
        self.chain
    }

    pub fn record(&self) -> BlockRecord<'a> {
        self.record
    }

    // --- Header ---

    pub fn height(&self) -> u32 {
        self.record.height()
    }

    pub fn hash(&self) -> Hash256 {
        self.record.hash()
    }

    /// Hash in the conventional byte-reversed hex form.
    pub fn hash_hex(&self) -> String {
        self.hash().to_display_hex()
    }

    pub fn version(&self) -> i32 {
        self.record.version()
    }

    pub fn timestamp(&self) -> u32 {
        self.record.timestamp()
    }

    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.timestamp()), 0).unwrap_or_default()
    }

    pub fn bits(&self) -> u32 {
        self.record.bits()
    }

    pub fn nonce(&self) -> u32 {
        self.record.nonce()
    }

    pub fn first_tx_index(&self) -> u32 {
        self.record.first_tx_index()
    }

    pub fn end_tx_index(&self) -> u32 {
        self.record.end_tx_index()
    }

    pub fn tx_count(&self) -> u32 {
        self.record.tx_count()
    }

    pub fn input_count(&self) -> u32 {
        self.record.input_count()
    }

    pub fn output_count(&self) -> u32 {
        self.record.output_count()
    }

    /// Serialized block size including witness data.
    pub fn size_bytes(&self) -> u32 {
        self.record.size()
    }

    pub fn base_size(&self) -> u32 {
        self.record.base_size()
    }

    pub fn weight(&self) -> u64 {
        u64::from(self.size_bytes()) + 3 * u64::from(self.base_size())
    }

    // --- Transactions ---

    pub fn transactions(&self) -> TransactionRange<'a> {
        TransactionRange::within_block(self.chain, self.first_tx_index(), self.end_tx_index(), self.height())
    }

    /// Transaction `index` of this block, counted from the coinbase.
    pub fn tx(&self, index: u32) -> Result<Transaction<'a>, LedgerError> {
        if index >= self.tx_count() {
            return Err(ChainError::out_of_range("tx in block", index, self.tx_count()).into());
        }
        let tx_num = self.first_tx_index() + index;
        let record = self.chain.tx(tx_num)?;
        Ok(Transaction::from_parts(self.chain, record, tx_num, self.height()))
    }

    pub fn coinbase_tx(&self) -> Result<Transaction<'a>, LedgerError> {
        self.tx(0)
    }

    /// Coinbase script bytes stored alongside the block.
    pub fn coinbase_data(&self) -> Result<&'a [u8], LedgerError> {
        Ok(self.chain.coinbase(&self.record)?)
    }

    pub fn total_in(&self) -> u64 {
        self.transactions().iter().map(|tx| tx.total_in()).sum()
    }

    pub fn total_out(&self) -> u64 {
        self.transactions().iter().map(|tx| tx.total_out()).sum()
    }

    /// Sum of transaction fees; the coinbase contributes nothing.
    pub fn fees(&self) -> u64 {
        self.transactions().iter().map(|tx| tx.fee()).sum()
    }
}

impl PartialEq for Block<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.height() == other.height() && std::ptr::eq(self.chain, other.chain)
    }
}

impl Eq for Block<'_> {}

impl fmt::Debug for Block<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("height", &self.height())
            .field("hash", &self.hash_hex())
            .field("txes", &self.tx_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Fixture, out, spend};

    fn fixture() -> Fixture {
        let mut fx = Fixture::new();
        fx.block(vec![(vec![], vec![out(1, 50)])]);
        fx.block(vec![
            (vec![], vec![out(2, 50)]),
            (vec![spend(0, 1, 50)], vec![out(3, 30), out(4, 15)]),
        ]);
        fx.write()
    }

    #[test]
    fn header_fields() {
        let fx = fixture();
        let chain = fx.chain();
        let block = Block::new(&chain, 1).unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.first_tx_index(), 1);
        assert_eq!(block.tx_count(), 2);
        assert_eq!(block.input_count(), 1);
        assert_eq!(block.output_count(), 3);
        assert_eq!(block.time().timestamp(), 1_600_000_600);
        assert_eq!(block.hash_hex().len(), 64);
    }

    #[test]
    fn transactions_walk_in_order() {
        let fx = fixture();
        let chain = fx.chain();
        let block = Block::new(&chain, 1).unwrap();
        let nums: Vec<_> = block.transactions().iter().map(|tx| tx.tx_num()).collect();
        assert_eq!(nums, vec![1, 2]);
        assert!(block.coinbase_tx().unwrap().is_coinbase());
        assert_eq!(block.tx(1).unwrap().tx_num(), 2);
        assert!(block.tx(2).is_err());
    }

    #[test]
    fn value_totals() {
        let fx = fixture();
        let chain = fx.chain();
        let block = Block::new(&chain, 1).unwrap();
        assert_eq!(block.total_in(), 50);
        assert_eq!(block.total_out(), 95);
        assert_eq!(block.fees(), 5);
    }

    #[test]
    fn coinbase_data_is_stored() {
        let fx = fixture();
        let chain = fx.chain();
        let block = Block::new(&chain, 0).unwrap();
        assert!(block.coinbase_data().unwrap().is_empty());
    }

    #[test]
    fn height_past_tip_fails() {
        let fx = fixture();
        let chain = fx.chain();
        assert!(Block::new(&chain, 2).is_err());
    }
}
