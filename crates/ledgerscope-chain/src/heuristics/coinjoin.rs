//! Coinjoin detection.

use std::collections::{BTreeMap, HashSet};

use ledgerscope_core::constants::DUST_VALUES;

use crate::transaction::Transaction;

/// Flags transactions whose inputs likely belong to several owners.
pub trait CoinjoinDetector: Sync {
    fn is_coinjoin(&self, tx: &Transaction<'_>) -> bool;
}

impl<D: CoinjoinDetector + ?Sized> CoinjoinDetector for Box<D> {
    fn is_coinjoin(&self, tx: &Transaction<'_>) -> bool {
        (**self).is_coinjoin(tx)
    }
}

impl<D: CoinjoinDetector + ?Sized> CoinjoinDetector for &D {
    fn is_coinjoin(&self, tx: &Transaction<'_>) -> bool {
        (**self).is_coinjoin(tx)
    }
}

/// Treats every transaction as single-owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCoinjoin;

impl CoinjoinDetector for NeverCoinjoin {
    fn is_coinjoin(&self, _tx: &Transaction<'_>) -> bool {
        false
    }
}

/// Equal-output mixing: `(outputs + 1) / 2` participants each receive the
/// same denomination and may take change.
///
/// Requires at least two inputs and three outputs, no more participants
/// than inputs or distinct input addresses, and the most common output value
/// occurring exactly once per participant. Ties between equally common
/// values resolve to the smallest value. Dust denominations never count.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualValueCoinjoin;

impl CoinjoinDetector for EqualValueCoinjoin {
    fn is_coinjoin(&self, tx: &Transaction<'_>) -> bool {
        let (inputs, outputs) = (usize::from(tx.input_count()), usize::from(tx.output_count()));
        if inputs < 2 || outputs < 3 {
            return false;
        }
        let participants = outputs.div_ceil(2);
        if participants > inputs {
            return false;
        }
        let addresses: HashSet<_> = tx.inputs().map(|i| i.address()).collect();
        if participants > addresses.len() {
            return false;
        }

        let mut values: BTreeMap<u64, usize> = BTreeMap::new();
        for output in tx.outputs() {
            *values.entry(output.value()).or_default() += 1;
        }
        // `max_by_key` keeps the last maximum, so walk from the largest value
        // down to settle ties on the smallest.
        let Some((&value, &count)) = values.iter().rev().max_by_key(|(_, count)| **count) else {
            return false;
        };
        count == participants && !DUST_VALUES.contains(&value)
    }
}
