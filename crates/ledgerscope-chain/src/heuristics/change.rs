//! Change-output heuristics.
//!
//! Each heuristic returns the outputs of a transaction it cannot rule out as
//! change. Outputs that can never be spent (OP_RETURN data carriers) are
//! never candidates. Heuristics that look at spending transactions treat an
//! unspent output, or one whose spender cannot be read, as unknown and keep
//! it.

use std::collections::{BTreeSet, HashSet};

use ledgerscope_core::types::OutputPointer;
use ledgerscope_store::ScriptAccess;

use crate::heuristics::coinjoin::{CoinjoinDetector, EqualValueCoinjoin};
use crate::transaction::{Output, Transaction};

/// Candidate change outputs of a transaction, by pointer.
pub type Candidates = BTreeSet<OutputPointer>;

pub trait ChangeHeuristic: Sync {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates;

    /// The change output, when exactly one candidate remains.
    fn unique_change<'a>(&self, tx: &Transaction<'a>) -> Option<Output<'a>> {
        let candidates = self.candidates(tx);
        match candidates.len() {
            1 => candidates.first().and_then(|p| tx.output(p.inout_num)),
            _ => None,
        }
    }

    /// Outputs both heuristics keep.
    fn and<H: ChangeHeuristic>(self, other: H) -> Intersection<Self, H>
    where
        Self: Sized,
    {
        Intersection(self, other)
    }

    /// Outputs either heuristic keeps.
    fn or<H: ChangeHeuristic>(self, other: H) -> Union<Self, H>
    where
        Self: Sized,
    {
        Union(self, other)
    }

    /// Outputs this heuristic keeps and `other` does not.
    fn except<H: ChangeHeuristic>(self, other: H) -> Difference<Self, H>
    where
        Self: Sized,
    {
        Difference(self, other)
    }
}

impl<H: ChangeHeuristic + ?Sized> ChangeHeuristic for Box<H> {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        (**self).candidates(tx)
    }
}

impl<H: ChangeHeuristic + ?Sized> ChangeHeuristic for &H {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        (**self).candidates(tx)
    }
}

fn spendable_where(tx: &Transaction<'_>, keep: impl Fn(&Output<'_>) -> bool) -> Candidates {
    tx.outputs()
        .filter(|o| o.is_spendable() && keep(o))
        .map(|o| o.pointer())
        .collect()
}

// --- Combinators ---

#[derive(Debug, Clone, Copy)]
pub struct Intersection<A, B>(pub A, pub B);

impl<A: ChangeHeuristic, B: ChangeHeuristic> ChangeHeuristic for Intersection<A, B> {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let left = self.0.candidates(tx);
        if left.is_empty() {
            return left;
        }
        left.intersection(&self.1.candidates(tx)).copied().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Union<A, B>(pub A, pub B);

impl<A: ChangeHeuristic, B: ChangeHeuristic> ChangeHeuristic for Union<A, B> {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let mut all = self.0.candidates(tx);
        all.extend(self.1.candidates(tx));
        all
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Difference<A, B>(pub A, pub B);

impl<A: ChangeHeuristic, B: ChangeHeuristic> ChangeHeuristic for Difference<A, B> {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let mut kept = self.0.candidates(tx);
        if !kept.is_empty() {
            let removed = self.1.candidates(tx);
            kept.retain(|p| !removed.contains(p));
        }
        kept
    }
}

/// Adapts a closure into a heuristic.
#[derive(Clone, Copy)]
pub struct ChangeFn<F>(pub F);

impl<F> ChangeFn<F>
where
    F: Fn(&Transaction<'_>) -> Candidates + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ChangeHeuristic for ChangeFn<F>
where
    F: Fn(&Transaction<'_>) -> Candidates + Sync,
{
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        (self.0)(tx)
    }
}

// --- Heuristics ---

/// Never identifies change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChange;

impl ChangeHeuristic for NoChange {
    fn candidates(&self, _tx: &Transaction<'_>) -> Candidates {
        Candidates::new()
    }
}

fn looks_like_peel(tx: &Transaction<'_>) -> bool {
    tx.input_count() == 1 && tx.output_count() == 2
}

/// One input, two outputs, and a neighbour on either side that looks the
/// same.
fn is_peeling_chain(tx: &Transaction<'_>) -> bool {
    if !looks_like_peel(tx) {
        return false;
    }
    let previous = tx
        .input(0)
        .and_then(|input| input.spent_tx().ok())
        .is_some_and(|prev| looks_like_peel(&prev));
    previous
        || tx
            .outputs()
            .filter_map(|o| o.spending_tx().ok().flatten())
            .any(|next| looks_like_peel(&next))
}

/// In a peeling chain the change output is the one that continues the
/// chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeelingChain;

impl ChangeHeuristic for PeelingChain {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        if !is_peeling_chain(tx) {
            return Candidates::new();
        }
        spendable_where(tx, |o| match o.spending_tx() {
            Ok(Some(next)) => is_peeling_chain(&next),
            _ => true,
        })
    }
}

/// Payments tend to be round; change rarely is. Keeps outputs whose value
/// is not a multiple of `10^digits`.
#[derive(Debug, Clone, Copy)]
pub struct PowerOfTen {
    pub digits: u32,
}

impl Default for PowerOfTen {
    fn default() -> Self {
        Self { digits: 6 }
    }
}

impl ChangeHeuristic for PowerOfTen {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let Some(unit) = 10u64.checked_pow(self.digits) else {
            return spendable_where(tx, |_| true);
        };
        spendable_where(tx, |o| o.value() % unit != 0)
    }
}

/// An output smaller than every input is likely change: a larger change
/// output would have made the smallest input unnecessary.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimalChange;

impl ChangeHeuristic for OptimalChange {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let Some(smallest) = tx.inputs().map(|i| i.value()).min() else {
            return Candidates::new();
        };
        spendable_where(tx, |o| o.value() < smallest)
    }
}

/// When every input has one address type, change usually shares it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptType;

impl ChangeHeuristic for ScriptType {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let mut types = tx.inputs().map(|i| i.address_type());
        let Some(first) = types.next() else {
            return Candidates::new();
        };
        if types.any(|t| t != first) {
            return Candidates::new();
        }
        spendable_where(tx, |o| o.address_type() == first)
    }
}

/// Wallets that set a locktime against fee sniping do so on every
/// transaction, so change is spent by a transaction with matching locktime
/// behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Locktime;

impl ChangeHeuristic for Locktime {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let locked = tx.locktime() > 0;
        spendable_where(tx, |o| match o.spending_tx() {
            Ok(Some(next)) => (next.locktime() > 0) == locked,
            _ => true,
        })
    }
}

/// Outputs paying back to one of the input addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressReuse;

impl ChangeHeuristic for AddressReuse {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let inputs: HashSet<_> = tx.inputs().map(|i| i.address().dedup()).collect();
        spendable_where(tx, |o| inputs.contains(&o.address().dedup()))
    }
}

fn first_seen_here(scripts: &ScriptAccess, tx: &Transaction<'_>, output: &Output<'_>) -> bool {
    let address = output.address();
    scripts
        .header(address.address_type.dedup_type(), address.script_num)
        .is_ok_and(|h| h.tx_first_seen == tx.tx_num())
}

/// Clients generate a fresh address for change: keeps outputs whose script
/// first appears in this transaction.
#[derive(Debug, Clone, Copy)]
pub struct FreshAddress<'s> {
    pub scripts: &'s ScriptAccess,
}

impl ChangeHeuristic for FreshAddress<'_> {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        spendable_where(tx, |o| first_seen_here(self.scripts, tx, o))
    }
}

/// The single fresh output smaller than every input, on a non-coinjoin
/// transaction with more than one spendable output.
#[derive(Debug, Clone, Copy)]
pub struct Legacy<'s> {
    pub scripts: &'s ScriptAccess,
}

impl ChangeHeuristic for Legacy<'_> {
    fn candidates(&self, tx: &Transaction<'_>) -> Candidates {
        let mut found = Candidates::new();
        if EqualValueCoinjoin.is_coinjoin(tx) {
            return found;
        }
        let smallest = tx.inputs().map(|i| i.value()).min().unwrap_or(u64::MAX);
        let mut spendable = 0usize;
        for output in tx.outputs().filter(|o| o.is_spendable()) {
            spendable += 1;
            if output.value() < smallest && first_seen_here(self.scripts, tx, &output) {
                if !found.is_empty() {
                    return Candidates::new();
                }
                found.insert(output.pointer());
            }
        }
        if spendable > 1 { found } else { Candidates::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Fixture, out, out_typed, spend};
    use ledgerscope_core::address::AddressType;
    use ledgerscope_core::records::Inout;
    use ledgerscope_store::NewTransaction;

    fn ptrs(tx_num: u32, outputs: &[u16]) -> Candidates {
        outputs.iter().map(|&i| OutputPointer::new(tx_num, i)).collect()
    }

    fn input_typed(spent: u32, script: u32, address_type: AddressType, value: u64) -> Inout {
        Inout::new(spent, script, address_type, value)
    }

    /// tx0 coinbase, tx1 spends it into two outputs; `outputs` for tx1.
    fn single_spend(inputs: Vec<Inout>, outputs: Vec<Inout>) -> Fixture {
        let mut fx = Fixture::new();
        fx.block(vec![(vec![], vec![out(1, 10_000_000)])]);
        fx.block(vec![(vec![], vec![out(9, 50)]), (inputs, outputs)]);
        fx.write()
    }

    #[test]
    fn power_of_ten_keeps_unround_values() {
        let fx = single_spend(
            vec![spend(0, 1, 10_000_000)],
            vec![out(2, 5_000_000), out(3, 4_987_654), out_typed(4, AddressType::NullData, 0)],
        );
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        assert_eq!(PowerOfTen::default().candidates(&tx), ptrs(2, &[1]));
        assert_eq!(PowerOfTen { digits: 0 }.candidates(&tx), ptrs(2, &[]));
        assert_eq!(PowerOfTen::default().unique_change(&tx).unwrap().value(), 4_987_654);
    }

    #[test]
    fn optimal_change_is_below_smallest_input() {
        let fx = single_spend(
            vec![spend(0, 1, 5_000), spend(1, 9, 3_000)],
            vec![out(2, 6_000), out(3, 1_500)],
        );
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        assert_eq!(OptimalChange.candidates(&tx), ptrs(2, &[1]));
    }

    #[test]
    fn script_type_needs_uniform_inputs() {
        let uniform = single_spend(
            vec![spend(0, 1, 5_000), spend(1, 9, 3_000)],
            vec![out_typed(2, AddressType::ScriptHash, 6_000), out(3, 1_500)],
        );
        let chain = uniform.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        assert_eq!(ScriptType.candidates(&tx), ptrs(2, &[1]));

        let mixed = single_spend(
            vec![spend(0, 1, 5_000), input_typed(1, 9, AddressType::WitnessPubkeyHash, 3_000)],
            vec![out_typed(2, AddressType::ScriptHash, 6_000), out(3, 1_500)],
        );
        let chain = mixed.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        assert!(ScriptType.candidates(&tx).is_empty());
    }

    #[test]
    fn address_reuse_matches_dedup_identity() {
        let fx = single_spend(
            vec![spend(0, 1, 10_000_000)],
            vec![out(2, 6_000_000), out_typed(1, AddressType::WitnessScriptHash, 3_000_000)],
        );
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        // Script 1 as pubkey-hash and as witness-script-hash are different
        // dedup identities.
        assert!(AddressReuse.candidates(&tx).is_empty());

        let fx = single_spend(
            vec![spend(0, 1, 10_000_000)],
            vec![out(2, 6_000_000), out_typed(1, AddressType::WitnessPubkeyHash, 3_000_000)],
        );
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        assert_eq!(AddressReuse.candidates(&tx), ptrs(2, &[1]));
    }

    fn peeling() -> Fixture {
        let mut fx = Fixture::new();
        fx.block(vec![(vec![], vec![out(1, 100)])]);
        fx.block(vec![(vec![spend(0, 1, 100)], vec![out(2, 60), out(3, 39)])]);
        fx.block(vec![
            (vec![spend(1, 2, 60)], vec![out(4, 30), out(5, 29)]),
            (vec![spend(1, 3, 39)], vec![out(6, 38)]),
        ]);
        fx.link_spend(0, 0, 1).link_spend(1, 0, 2).link_spend(1, 1, 3);
        fx.write()
    }

    #[test]
    fn peeling_chain_follows_the_chain() {
        let fx = peeling();
        let chain = fx.chain();
        let head = Transaction::load(&chain, 1).unwrap();
        assert_eq!(PeelingChain.candidates(&head), ptrs(1, &[0]));

        let tail = Transaction::load(&chain, 2).unwrap();
        assert_eq!(PeelingChain.candidates(&tail), ptrs(2, &[0, 1]));
        assert!(PeelingChain.unique_change(&tail).is_none());

        let side = Transaction::load(&chain, 3).unwrap();
        assert!(PeelingChain.candidates(&side).is_empty());
    }

    #[test]
    fn locktime_matches_spender_behaviour() {
        let mut fx = Fixture::new();
        fx.block(vec![(vec![], vec![out(1, 100)])]);
        fx.block_txes(vec![
            NewTransaction::new(vec![spend(0, 1, 100)], vec![out(2, 60), out(3, 30), out(4, 5)]).with_locktime(1),
        ]);
        fx.block_txes(vec![
            NewTransaction::new(vec![spend(1, 2, 60)], vec![out(5, 50)]).with_locktime(0),
            NewTransaction::new(vec![spend(1, 3, 30)], vec![out(6, 20)]).with_locktime(2),
        ]);
        fx.link_spend(1, 0, 2).link_spend(1, 1, 3);
        let fx = fx.write();
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 1).unwrap();
        assert_eq!(Locktime.candidates(&tx), ptrs(1, &[1, 2]));
    }

    #[test]
    fn fresh_address_uses_first_seen() {
        use ledgerscope_store::ScriptWriter;
        use ledgerscope_store::scripts::ScriptHeader;

        let fx = single_spend(
            vec![spend(0, 1, 10_000_000)],
            vec![out(2, 6_000_000), out(3, 3_000_000)],
        );
        let mut writer = ScriptWriter::open(fx.config()).unwrap();
        for first_seen in [0, 2, 0] {
            writer.append_pubkey(ScriptHeader::new(first_seen), None).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        let scripts = ScriptAccess::open(fx.config()).unwrap();
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        assert_eq!(FreshAddress { scripts: &scripts }.candidates(&tx), ptrs(2, &[0]));
        assert_eq!(Legacy { scripts: &scripts }.candidates(&tx), ptrs(2, &[0]));
    }

    #[test]
    fn combinators_compose_sets() {
        let fx = single_spend(
            vec![spend(0, 1, 5_000), spend(1, 9, 3_000)],
            vec![out(2, 2_000_000), out(3, 1_500), out(4, 2_000)],
        );
        let chain = fx.chain();
        let tx = Transaction::load(&chain, 2).unwrap();
        let round = PowerOfTen { digits: 3 };
        assert_eq!(OptimalChange.candidates(&tx), ptrs(2, &[1, 2]));
        assert_eq!(round.candidates(&tx), ptrs(2, &[1]));
        assert_eq!(OptimalChange.and(round).candidates(&tx), ptrs(2, &[1]));
        assert_eq!(OptimalChange.except(round).candidates(&tx), ptrs(2, &[2]));
        assert_eq!(NoChange.or(round).candidates(&tx), ptrs(2, &[1]));
        assert_eq!(OptimalChange.and(round).unique_change(&tx).unwrap().value(), 1_500);

        let last = ChangeFn::new(|tx: &Transaction<'_>| ptrs(tx.tx_num(), &[tx.output_count() - 1]));
        assert_eq!(last.candidates(&tx), ptrs(2, &[2]));
        let boxed: Box<dyn ChangeHeuristic> = Box::new(NoChange);
        assert!(boxed.unique_change(&tx).is_none());
    }
}
