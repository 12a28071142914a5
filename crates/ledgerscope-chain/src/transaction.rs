//! Transactions and their inputs and outputs.

use std::fmt;

use ledgerscope_core::address::{Address, AddressType};
use ledgerscope_core::error::LedgerError;
use ledgerscope_core::records::{Inout, TxRecord};
use ledgerscope_core::types::{InputPointer, OutputPointer};
use ledgerscope_store::ChainAccess;

use crate::block::Block;

/// Address of an in/out entry. Record parsing rejects unknown tags, so the
/// fallback is never taken for a record read through the store.
fn entry_address(inout: &Inout) -> Address {
    Address::new(
        inout.script_num,
        inout.address_type().unwrap_or(AddressType::Nonstandard),
    )
}

/// A transaction record together with its position in the chain.
#[derive(Clone, Copy)]
pub struct Transaction<'a> {
    chain: &'a ChainAccess,
    record: TxRecord<'a>,
    tx_num: u32,
    block_height: u32,
}

impl<'a> Transaction<'a> {
    /// Load transaction `tx_num`, locating its block by binary search.
    pub fn load(chain: &'a ChainAccess, tx_num: u32) -> Result<Self, LedgerError> {
        let record = chain.tx(tx_num)?;
        let block_height = chain.block_height_of(tx_num)?;
        Ok(Self::from_parts(chain, record, tx_num, block_height))
    }

    pub(crate) fn from_parts(chain: &'a ChainAccess, record: TxRecord<'a>, tx_num: u32, block_height: u32) -> Self {
        Self {
            chain,
            record,
            tx_num,
            block_height,
        }
    }

    pub fn tx_num(&self) -> u32 {
        self.tx_num
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    pub fn block(&self) -> Result<Block<'a>, LedgerError> {
        Block::new(self.chain, self.block_height)
    }

    pub fn chain(&self) -> &'a ChainAccess {
        self.chain
    }

    pub fn record(&self) -> TxRecord<'a> {
        self.record
    }

    pub fn locktime(&self) -> u32 {
        self.record.locktime()
    }

    /// Serialized size including witness data.
    pub fn total_size(&self) -> u32 {
        self.record.total_size()
    }

    /// Serialized size without witness data.
    pub fn base_size(&self) -> u32 {
        self.record.base_size()
    }

    pub fn weight(&self) -> u64 {
        u64::from(self.total_size()) + 3 * u64::from(self.base_size())
    }

    /// Weight divided by four, rounded up.
    pub fn virtual_size(&self) -> u64 {
        self.weight().div_ceil(4)
    }

    pub fn input_count(&self) -> u16 {
        self.record.input_count()
    }

    pub fn output_count(&self) -> u16 {
        self.record.output_count()
    }

    pub fn is_coinbase(&self) -> bool {
        self.input_count() == 0
    }

    pub fn input(&self, index: u16) -> Option<Input<'a>> {
        let inout = self.record.input(index)?;
        Some(Input {
            chain: self.chain,
            inout,
            pointer: InputPointer::new(self.tx_num, index),
            block_height: self.block_height,
        })
    }

    pub fn output(&self, index: u16) -> Option<Output<'a>> {
        let inout = self.record.output(index)?;
        Some(Output {
            chain: self.chain,
            inout,
            pointer: OutputPointer::new(self.tx_num, index),
            block_height: self.block_height,
        })
    }

    pub fn inputs(&self) -> Inputs<'a> {
        Inputs {
            tx: *self,
            front: 0,
            back: self.input_count(),
        }
    }

    pub fn outputs(&self) -> Outputs<'a> {
        Outputs {
            tx: *self,
            front: 0,
            back: self.output_count(),
        }
    }

    pub fn total_in(&self) -> u64 {
        (0..self.input_count())
            .filter_map(|i| self.record.input(i))
            .map(|e| e.value())
            .sum()
    }

    pub fn total_out(&self) -> u64 {
        (0..self.output_count())
            .filter_map(|i| self.record.output(i))
            .map(|e| e.value())
            .sum()
    }

    /// Input value minus output value; 0 for a coinbase.
    pub fn fee(&self) -> u64 {
        if self.is_coinbase() {
            return 0;
        }
        self.total_in().saturating_sub(self.total_out())
    }

    /// Fee per virtual byte.
    pub fn fee_per_byte(&self) -> f64 {
        match self.virtual_size() {
            0 => 0.0,
            vsize => self.fee() as f64 / vsize as f64,
        }
    }
}

impl PartialEq for Transaction<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.tx_num == other.tx_num && std::ptr::eq(self.chain, other.chain)
    }
}

impl Eq for Transaction<'_> {}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("tx_num", &self.tx_num)
            .field("block_height", &self.block_height)
            .field("inputs", &self.input_count())
            .field("outputs", &self.output_count())
            .finish()
    }
}

// --- Bounded in/out views ---

macro_rules! inout_iter {
    ($name:ident, $item:ident, $get:ident) => {
        /// Double-ended view over a transaction's entries, read on demand.
        #[derive(Clone)]
        pub struct $name<'a> {
            tx: Transaction<'a>,
            front: u16,
            back: u16,
        }

        impl<'a> Iterator for $name<'a> {
            type Item = $item<'a>;

            fn next(&mut self) -> Option<Self::Item> {
                if self.front >= self.back {
                    return None;
                }
                let item = self.tx.$get(self.front);
                self.front += 1;
                item
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                let len = usize::from(self.back - self.front);
                (len, Some(len))
            }
        }

        impl DoubleEndedIterator for $name<'_> {
            fn next_back(&mut self) -> Option<Self::Item> {
                if self.front >= self.back {
                    return None;
                }
                self.back -= 1;
                self.tx.$get(self.back)
            }
        }

        impl ExactSizeIterator for $name<'_> {}
    };
}

inout_iter!(Inputs, Input, input);
inout_iter!(Outputs, Output, output);

/// An input: the spending side of a previous output.
#[derive(Clone, Copy)]
pub struct Input<'a> {
    chain: &'a ChainAccess,
    inout: Inout,
    pointer: InputPointer,
    block_height: u32,
}

impl<'a> Input<'a> {
    pub fn pointer(&self) -> InputPointer {
        self.pointer
    }

    pub fn address(&self) -> Address {
        entry_address(&self.inout)
    }

    pub fn address_type(&self) -> AddressType {
        self.address().address_type
    }

    pub fn value(&self) -> u64 {
        self.inout.value()
    }

    /// Height of the block containing the spending transaction.
    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    /// Number of the transaction whose output this input spends.
    pub fn spent_tx_num(&self) -> u32 {
        self.inout.linked_tx_num
    }

    pub fn spent_tx(&self) -> Result<Transaction<'a>, LedgerError> {
        Transaction::load(self.chain, self.spent_tx_num())
    }

    pub fn spending_tx(&self) -> Result<Transaction<'a>, LedgerError> {
        Transaction::load(self.chain, self.pointer.tx_num)
    }
}

impl fmt::Debug for Input<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Input({}, spends tx {}, {} {})",
            self.pointer,
            self.spent_tx_num(),
            self.value(),
            self.address()
        )
    }
}

/// An output: value locked to an address, possibly spent later.
#[derive(Clone, Copy)]
pub struct Output<'a> {
    chain: &'a ChainAccess,
    inout: Inout,
    pointer: OutputPointer,
    block_height: u32,
}

impl<'a> Output<'a> {
    pub fn pointer(&self) -> OutputPointer {
        self.pointer
    }

    pub fn address(&self) -> Address {
        entry_address(&self.inout)
    }

    pub fn address_type(&self) -> AddressType {
        self.address().address_type
    }

    pub fn value(&self) -> u64 {
        self.inout.value()
    }

    /// Height of the block containing the creating transaction.
    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    pub fn is_spent(&self) -> bool {
        self.inout.linked_tx_num != 0
    }

    pub fn is_spendable(&self) -> bool {
        self.address_type().is_spendable()
    }

    pub fn spending_tx_num(&self) -> Option<u32> {
        self.is_spent().then_some(self.inout.linked_tx_num)
    }

    pub fn spending_tx(&self) -> Result<Option<Transaction<'a>>, LedgerError> {
        self.spending_tx_num()
            .map(|num| Transaction::load(self.chain, num))
            .transpose()
    }

    pub fn creating_tx(&self) -> Result<Transaction<'a>, LedgerError> {
        Transaction::load(self.chain, self.pointer.tx_num)
    }
}

impl fmt::Debug for Output<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Output({}, {} {}, spent by {:?})",
            self.pointer,
            self.value(),
            self.address(),
            self.spending_tx_num()
        )
    }
}
