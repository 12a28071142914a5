//! Clustering invariants against a sequential reference partition.
//!
//! Properties covered:
//! - every qualifying transaction's inputs land in one cluster
//! - single-input and coinbase transactions link nothing by themselves
//! - reruns and pool sizes do not change the partition
//! - `members_of(cluster_of(a))` always contains `a`

use std::collections::BTreeSet;

use proptest::prelude::*;

use ledgerscope_chain::heuristics::{ChangeFn, CoinjoinDetector, EqualValueCoinjoin};
use ledgerscope_chain::{Parallelism, Transaction, TransactionRange};
use ledgerscope_cluster::{ClusterAccess, ClusterBuilder};
use ledgerscope_core::address::{Address, AddressType, DedupAddress, DedupAddressType};
use ledgerscope_tests::helpers::{TestChain, TestLedger, init_logging, partition, pk, reference_partition};

const SCRIPTS: u32 = 16;

/// `(input scripts, output (script, value) pairs)`
type Shape = (Vec<u32>, Vec<(u32, u64)>);

fn shapes() -> impl Strategy<Value = Vec<Shape>> {
    let script = 1..=SCRIPTS;
    let value = prop_oneof![Just(100u64), Just(250u64), 1u64..10_000];
    let tx = (
        prop::collection::vec(script.clone(), 0..5),
        prop::collection::vec((script, value), 1..6),
    );
    prop::collection::vec(tx, 1..60)
}

/// Five transactions per block.
fn ledger_from(shapes: &[Shape]) -> TestLedger {
    let mut chain = TestChain::new(SCRIPTS);
    for block in shapes.chunks(5) {
        chain.block();
        for (inputs, outputs) in block {
            chain.loose(inputs, outputs);
        }
    }
    chain.write()
}

/// Links the clustering rules should produce with no change heuristic.
fn expected_links(ledger: &TestLedger) -> Vec<(DedupAddress, DedupAddress)> {
    let mut links = Vec::new();
    for tx in TransactionRange::all(&ledger.data.chain).iter() {
        if tx.is_coinbase() || EqualValueCoinjoin.is_coinjoin(&tx) {
            continue;
        }
        let inputs: Vec<DedupAddress> = tx.inputs().map(|i| i.address().dedup()).collect();
        links.extend(inputs.iter().skip(1).map(|a| (inputs[0], *a)));
    }
    links
}

fn all_pubkeys() -> impl Iterator<Item = DedupAddress> {
    (1..=SCRIPTS).map(pk)
}

fn cluster(ledger: &TestLedger) -> ClusterAccess {
    ClusterBuilder::new().overwrite(true).build(&ledger.data, ledger.cluster_dir()).unwrap();
    ClusterAccess::open(ledger.cluster_dir()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn partition_matches_reference(shapes in shapes()) {
        init_logging();
        let ledger = ledger_from(&shapes);
        let access = cluster(&ledger);
        let expected = reference_partition(all_pubkeys(), &expected_links(&ledger));
        prop_assert_eq!(partition(&access), expected);
    }

    #[test]
    fn common_inputs_share_a_cluster(shapes in shapes()) {
        let ledger = ledger_from(&shapes);
        let access = cluster(&ledger);
        for tx in TransactionRange::all(&ledger.data.chain).iter() {
            if tx.input_count() < 2 || EqualValueCoinjoin.is_coinjoin(&tx) {
                continue;
            }
            let ids: BTreeSet<u32> = tx
                .inputs()
                .map(|i| access.cluster_of(i.address()).unwrap())
                .collect();
            prop_assert_eq!(ids.len(), 1, "tx {} split across {:?}", tx.tx_num(), ids);
        }
    }

    #[test]
    fn single_input_transactions_link_nothing(
        txes in prop::collection::vec((prop::option::of(1..=SCRIPTS), 1..=SCRIPTS), 1..40),
    ) {
        let mut chain = TestChain::new(SCRIPTS);
        chain.block();
        for (input, output) in &txes {
            let inputs: Vec<u32> = input.iter().copied().collect();
            chain.loose(&inputs, &[(*output, 500)]);
        }
        let ledger = chain.write();
        let summary = ClusterBuilder::new().build(&ledger.data, ledger.cluster_dir()).unwrap();
        prop_assert_eq!(summary.links, 0);
        prop_assert_eq!(summary.clusters, SCRIPTS);
        prop_assert_eq!(summary.largest_cluster, 1);
    }

    #[test]
    fn reruns_reproduce_the_partition(shapes in shapes()) {
        let ledger = ledger_from(&shapes);
        let single = Parallelism::new(1).unwrap();
        let wide = Parallelism::new(4).unwrap();

        single.install(|| ClusterBuilder::new().build(&ledger.data, ledger.cluster_dir())).unwrap();
        let first = ClusterAccess::open(ledger.cluster_dir()).unwrap();
        let first_ids: Vec<u32> = all_pubkeys().map(|a| first.cluster_of(a).unwrap()).collect();
        let first_partition = partition(&first);
        drop(first);

        wide.install(|| ClusterBuilder::new().overwrite(true).build(&ledger.data, ledger.cluster_dir())).unwrap();
        let second = ClusterAccess::open(ledger.cluster_dir()).unwrap();
        prop_assert_eq!(partition(&second), first_partition);
        // Remapping follows address order, so ids match too.
        let second_ids: Vec<u32> = all_pubkeys().map(|a| second.cluster_of(a).unwrap()).collect();
        prop_assert_eq!(second_ids, first_ids);
    }

    #[test]
    fn members_contain_their_address(shapes in shapes()) {
        let ledger = ledger_from(&shapes);
        let access = cluster(&ledger);
        for address in all_pubkeys() {
            let id = access.cluster_of(address).unwrap();
            prop_assert!(access.members_of(id).unwrap().contains(&address));
        }
        let sizes: u32 = access.cluster_sizes().iter().sum();
        prop_assert_eq!(u64::from(sizes), access.address_count());
    }
}

// Scenario: Tx1 spends A and B into C (0.5) and D (0.3); Tx2 spends C alone
// into E.
const A: u32 = 1;
const B: u32 = 2;
const C: u32 = 3;
const D: u32 = 4;
const E: u32 = 5;

fn scenario() -> TestLedger {
    let mut chain = TestChain::new(5);
    let fund_a = chain.block().coinbase(&[(A, 60_000_000)]);
    let fund_b = chain.coinbase(&[(B, 30_000_000)]);
    let tx1 = chain.block().spend(&[(fund_a, 0), (fund_b, 0)], &[(C, 50_000_000), (D, 30_000_000)]);
    chain.block().spend(&[(tx1, 0)], &[(E, 49_990_000)]);
    chain.write()
}

#[test]
fn scenario_without_change_heuristic() {
    init_logging();
    let ledger = scenario();
    let access = cluster(&ledger);
    let of = |n| access.cluster_of(pk(n)).unwrap();

    assert_eq!(of(A), of(B));
    assert_ne!(of(C), of(A));
    assert_ne!(of(D), of(A));
    assert_ne!(of(E), of(C));
    assert_eq!(access.cluster_count(), 4);
}

#[test]
fn scenario_with_change_heuristic() {
    let ledger = scenario();
    // Treat the smaller output as change.
    let smallest = ChangeFn::new(|tx: &Transaction<'_>| {
        tx.outputs()
            .min_by_key(|o| o.value())
            .filter(|_| tx.output_count() > 1)
            .map(|o| o.pointer())
            .into_iter()
            .collect()
    });
    ClusterBuilder::new()
        .with_change_heuristic(smallest)
        .build(&ledger.data, ledger.cluster_dir())
        .unwrap();
    let access = ClusterAccess::open(ledger.cluster_dir()).unwrap();
    let of = |n| access.cluster_of(pk(n)).unwrap();

    assert_eq!(of(D), of(A));
    assert_eq!(of(B), of(A));
    assert_ne!(of(C), of(A));
    assert_ne!(of(E), of(C));
}

#[test]
fn scripthash_joins_its_wrapped_key() {
    let mut chain = TestChain::new(3);
    let sh = chain.scripthash(Some(Address::new(2, AddressType::WitnessPubkeyHash)));
    chain.scripthash(None);
    chain.block().loose(&[1, 2], &[(3, 10)]);
    let ledger = chain.write();
    let access = cluster(&ledger);

    let wrapped = DedupAddress::new(sh, DedupAddressType::ScriptHash);
    let bare = DedupAddress::new(2, DedupAddressType::ScriptHash);
    assert_eq!(access.cluster_of(wrapped).unwrap(), access.cluster_of(pk(1)).unwrap());
    assert_ne!(access.cluster_of(bare).unwrap(), access.cluster_of(pk(1)).unwrap());
    assert_eq!(access.cluster_size(access.cluster_of(pk(1)).unwrap()).unwrap(), 3);
    assert_eq!(access.address_count(), 5);
}

#[test]
fn writes_to_any_output_directory() {
    let ledger = scenario();
    let out = ledger.path().join("elsewhere");
    let summary = ClusterBuilder::new().build(&ledger.data, &out).unwrap();
    let access = ClusterAccess::open(&out).unwrap();
    assert_eq!(access.cluster_count(), summary.clusters);
    assert_eq!(access.address_count(), u64::from(summary.addresses));
}
