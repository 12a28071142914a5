//! Map-reduce determinism and segment balance over randomized chains.
//!
//! Block sizes are drawn with heavy skew so that block-count partitioning
//! would be visibly unbalanced.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ledgerscope_chain::parallel::reduce_segments;
use ledgerscope_chain::{BlockRange, Parallelism, TransactionRange, Transaction};
use ledgerscope_tests::helpers::{TestChain, TestLedger, init_logging};

const SCRIPTS: u32 = 12;

/// One block per entry of `sizes`: a coinbase followed by `size - 1`
/// transactions with 0..=3 inputs.
fn sized_ledger(sizes: &[u32]) -> TestLedger {
    let mut chain = TestChain::new(SCRIPTS);
    for (height, size) in sizes.iter().enumerate() {
        chain.block().coinbase(&[(1, 5_000)]);
        for j in 1..*size {
            let seed = height as u32 * 31 + j;
            let inputs: Vec<u32> = (0..seed % 4).map(|k| (seed + k) % SCRIPTS + 1).collect();
            chain.loose(&inputs, &[(seed % SCRIPTS + 1, u64::from(seed % 7) * 100)]);
        }
    }
    chain.write()
}

fn block_sizes() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(prop_oneof![4 => 1u32..4, 1 => 50u32..250], 1..30)
}

type Stats = (u64, u64, u64);

fn stats(tx: Transaction<'_>) -> Stats {
    (1, u64::from(tx.input_count()), tx.fee())
}

fn add(a: Stats, b: Stats) -> Stats {
    (a.0 + b.0, a.1 + b.1, a.2 + b.2)
}

fn sequential(range: &BlockRange<'_>) -> Stats {
    range.txes().iter().map(stats).fold((0, 0, 0), add)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn map_reduce_ignores_pool_size(sizes in block_sizes()) {
        init_logging();
        let ledger = sized_ledger(&sizes);
        let range = BlockRange::all(&ledger.data.chain);
        let expected = sequential(&range);
        prop_assert_eq!(expected.0, u64::from(sizes.iter().sum::<u32>()));

        for threads in [1usize, 2, 3, 8] {
            let pool = Parallelism::new(threads).unwrap();
            let by_block = pool.install(|| range.map_reduce_txes(stats, add, || (0, 0, 0)));
            prop_assert_eq!(by_block, expected, "{} threads, block segments", threads);
            let by_tx = pool.install(|| range.txes().map_reduce(stats, add, || (0, 0, 0)));
            prop_assert_eq!(by_tx, expected, "{} threads, tx segments", threads);
        }
    }

    #[test]
    fn map_reduce_ignores_partitioning(sizes in block_sizes(), n in 1usize..20) {
        let ledger = sized_ledger(&sizes);
        let range = BlockRange::all(&ledger.data.chain);
        let expected = sequential(&range);

        let blocks = reduce_segments(
            &range.segment(n),
            &|s: BlockRange<'_>| s.txes().iter().map(stats).fold((0, 0, 0), add),
            &add,
            &|| (0, 0, 0),
        );
        prop_assert_eq!(blocks, expected);

        let txes = reduce_segments(
            &range.txes().segment(n),
            &|s: TransactionRange<'_>| s.iter().map(stats).fold((0, 0, 0), add),
            &add,
            &|| (0, 0, 0),
        );
        prop_assert_eq!(txes, expected);
    }

    #[test]
    fn ordered_reduction_via_carried_index(sizes in block_sizes()) {
        let ledger = sized_ledger(&sizes);
        let range = BlockRange::all(&ledger.data.chain);
        // Highest fee, earliest transaction on ties.
        let pick = |a: Option<(u64, u32)>, b: Option<(u64, u32)>| match (a, b) {
            (Some(x), Some(y)) => Some(if (y.0, std::cmp::Reverse(y.1)) > (x.0, std::cmp::Reverse(x.1)) { y } else { x }),
            (x, None) => x,
            (None, y) => y,
        };
        let expected = range.txes().iter().map(|tx| Some((tx.fee(), tx.tx_num()))).fold(None, pick);
        for threads in [1usize, 4] {
            let pool = Parallelism::new(threads).unwrap();
            let got = pool.install(|| range.map_reduce_txes(|tx| Some((tx.fee(), tx.tx_num())), pick, || None));
            prop_assert_eq!(got, expected);
        }
    }

    #[test]
    fn tx_segments_differ_by_at_most_one(sizes in block_sizes(), n in 1usize..40) {
        let ledger = sized_ledger(&sizes);
        let all = TransactionRange::all(&ledger.data.chain);
        let segments = all.segment(n);

        prop_assert_eq!(segments.len(), n.min(all.len() as usize));
        prop_assert_eq!(segments[0].start(), all.start());
        prop_assert_eq!(segments[segments.len() - 1].stop(), all.stop());
        for pair in segments.windows(2) {
            prop_assert_eq!(pair[0].stop(), pair[1].start());
        }
        let lens: Vec<u32> = segments.iter().map(|s| s.len()).collect();
        let (min, max) = (lens.iter().min().unwrap(), lens.iter().max().unwrap());
        prop_assert!(max - min <= 1, "lengths {:?}", lens);
    }

    #[test]
    fn block_segments_bounded_under_skew(sizes in block_sizes(), n in 1usize..16) {
        let ledger = sized_ledger(&sizes);
        let range = BlockRange::all(&ledger.data.chain);
        let segments = range.segment(n);
        let total = range.total_tx_count();
        let largest_block = *sizes.iter().max().unwrap();
        let bound = total.div_ceil(n as u32) + largest_block - 1;

        prop_assert!(segments.len() <= n);
        prop_assert_eq!(segments[0].start(), range.start());
        prop_assert_eq!(segments[segments.len() - 1].stop(), range.stop());
        for pair in segments.windows(2) {
            prop_assert_eq!(pair[0].stop(), pair[1].start());
        }
        prop_assert_eq!(segments.iter().map(|s| s.total_tx_count()).sum::<u32>(), total);
        for segment in &segments {
            prop_assert!(!segment.is_empty());
            prop_assert!(segment.total_tx_count() <= bound, "{:?} over bound {}", segment, bound);
        }
    }

    #[test]
    fn single_tx_blocks_split_evenly(blocks in 1usize..300, n in 1usize..24) {
        let ledger = sized_ledger(&vec![1; blocks]);
        let range = BlockRange::all(&ledger.data.chain);
        let counts: Vec<u32> = range.segment(n).iter().map(|s| s.total_tx_count()).collect();
        let (min, max) = (counts.iter().min().unwrap(), counts.iter().max().unwrap());
        prop_assert!(max - min <= 1, "counts {:?}", counts);
        prop_assert_eq!(counts.len(), n.min(blocks));
    }
}

#[test]
fn cursor_walk_matches_random_access() {
    let ledger = sized_ledger(&[1, 40, 2, 1, 120, 3]);
    let all = TransactionRange::all(&ledger.data.chain);
    let forward: Vec<u32> = all.iter().map(|tx| tx.tx_num()).collect();
    assert_eq!(forward, (0..all.len()).collect::<Vec<_>>());

    let backward: Vec<u32> = all.iter().rev().map(|tx| tx.tx_num()).collect();
    assert_eq!(backward, (0..all.len()).rev().collect::<Vec<_>>());

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..64 {
        let tx_num = rng.gen_range(0..all.len());
        let tx = all.get(tx_num).unwrap();
        let block = tx.block().unwrap();
        assert!(block.first_tx_index() <= tx_num && tx_num < block.end_tx_index());
        assert_eq!(all.iter().nth(tx_num as usize).map(|t| t.tx_num()), Some(tx_num));
    }
}
