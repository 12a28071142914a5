//! Fork-join map-reduce over chain ranges.
//!
//! A range is split into one segment per worker thread (by transaction
//! count for block ranges), then reduced by recursive bisection: the right
//! half runs on the calling thread while the left half is offered to the
//! pool, and the pair is combined as `combine(combine(identity(), right),
//! left)`. Both halves always complete before the call returns.
//!
//! `combine` must be associative, and results should not depend on the order
//! in which segments are combined. Reducers that need chain order carry an
//! index in the mapped value and sort once at the end, as [`BlockRange::map`]
//! does.
//!
//! Panics in `map` or `combine` resurface on the calling thread after the
//! sibling half has finished; `try_*` variants return the first `Err` seen
//! after the join. The range conveniences' `try_*` variants also surface
//! record read failures, converted into the caller's error type.

use ledgerscope_core::error::LedgerError;

use crate::block::Block;
use crate::range::{BlockRange, Blocks, TransactionRange, Transactions};
use crate::transaction::Transaction;

/// A range the engine can split into independent work units.
pub trait Segmented: Copy + Send + Sync {
    fn split(&self, n: usize) -> Vec<Self>;
}

impl Segmented for BlockRange<'_> {
    fn split(&self, n: usize) -> Vec<Self> {
        self.segment(n)
    }
}

impl Segmented for TransactionRange<'_> {
    fn split(&self, n: usize) -> Vec<Self> {
        self.segment(n)
    }
}

// --- Engine ---

/// Map every segment of `range` and combine the results. The segment count
/// follows the current worker pool's thread count.
pub fn map_reduce<S, R, M, C, I>(range: S, map: M, combine: C, identity: I) -> R
where
    S: Segmented,
    R: Send,
    M: Fn(S) -> R + Sync,
    C: Fn(R, R) -> R + Sync,
    I: Fn() -> R + Sync,
{
    let segments = range.split(rayon::current_num_threads());
    tracing::debug!(segments = segments.len(), threads = rayon::current_num_threads(), "map-reduce");
    reduce_segments(&segments, &map, &combine, &identity)
}

/// Bisect `segments` until one remains, mapping leaves and combining pairs.
pub fn reduce_segments<S, R, M, C, I>(segments: &[S], map: &M, combine: &C, identity: &I) -> R
where
    S: Segmented,
    R: Send,
    M: Fn(S) -> R + Sync,
    C: Fn(R, R) -> R + Sync,
    I: Fn() -> R + Sync,
{
    match segments {
        [] => identity(),
        [single] => combine(identity(), map(*single)),
        _ => {
            let (left, right) = segments.split_at(segments.len() / 2);
            let (right, left) = rayon::join(
                || reduce_segments(right, map, combine, identity),
                || reduce_segments(left, map, combine, identity),
            );
            combine(combine(identity(), right), left)
        }
    }
}

/// As [`map_reduce`] with a fallible map.
pub fn try_map_reduce<S, T, E, M, C, I>(range: S, map: M, combine: C, identity: I) -> Result<T, E>
where
    S: Segmented,
    T: Send,
    E: Send,
    M: Fn(S) -> Result<T, E> + Sync,
    C: Fn(T, T) -> T + Sync,
    I: Fn() -> T + Sync,
{
    let segments = range.split(rayon::current_num_threads());
    try_reduce_segments(&segments, &map, &combine, &identity)
}

pub fn try_reduce_segments<S, T, E, M, C, I>(segments: &[S], map: &M, combine: &C, identity: &I) -> Result<T, E>
where
    S: Segmented,
    T: Send,
    E: Send,
    M: Fn(S) -> Result<T, E> + Sync,
    C: Fn(T, T) -> T + Sync,
    I: Fn() -> T + Sync,
{
    match segments {
        [] => Ok(identity()),
        [single] => Ok(combine(identity(), map(*single)?)),
        _ => {
            let (left, right) = segments.split_at(segments.len() / 2);
            let (right, left) = rayon::join(
                || try_reduce_segments(right, map, combine, identity),
                || try_reduce_segments(left, map, combine, identity),
            );
            Ok(combine(combine(identity(), right?), left?))
        }
    }
}

// --- Worker pool ---

/// A worker pool of fixed size. Map-reduce calls made inside
/// [`install`](Parallelism::install) split into that many segments.
pub struct Parallelism {
    pool: rayon::ThreadPool,
}

impl Parallelism {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ledgerscope-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for Parallelism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallelism").field("threads", &self.threads()).finish()
    }
}

// --- Range conveniences ---

impl<'a> BlockRange<'a> {
    /// Map each block and combine, folding blocks within a segment in chain
    /// order.
    pub fn map_reduce<R, M, C, I>(&self, map: M, combine: C, identity: I) -> R
    where
        R: Send,
        M: Fn(Block<'a>) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
        I: Fn() -> R + Sync,
    {
        map_reduce(
            *self,
            |segment: BlockRange<'a>| segment.iter().fold(identity(), |acc, block| combine(acc, map(block))),
            &combine,
            &identity,
        )
    }

    /// Map each transaction of each block and combine.
    pub fn map_reduce_txes<R, M, C, I>(&self, map: M, combine: C, identity: I) -> R
    where
        R: Send,
        M: Fn(Transaction<'a>) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
        I: Fn() -> R + Sync,
    {
        map_reduce(
            *self,
            |segment: BlockRange<'a>| segment.txes().iter().fold(identity(), |acc, tx| combine(acc, map(tx))),
            &combine,
            &identity,
        )
    }

    /// Map each block with a fallible function; the first error, from `map`
    /// or from reading a block, stops its segment and is returned once every
    /// segment has joined.
    pub fn try_map_reduce<T, E, M, C, I>(&self, map: M, combine: C, identity: I) -> Result<T, E>
    where
        T: Send,
        E: Send + From<LedgerError>,
        M: Fn(Block<'a>) -> Result<T, E> + Sync,
        C: Fn(T, T) -> T + Sync,
        I: Fn() -> T + Sync,
    {
        try_map_reduce(
            *self,
            |segment: BlockRange<'a>| try_fold_blocks(segment.iter(), identity(), &map, &combine),
            &combine,
            &identity,
        )
    }

    /// Map each transaction with a fallible function. Transaction read
    /// failures are returned like errors from `map`.
    pub fn try_map_reduce_txes<T, E, M, C, I>(&self, map: M, combine: C, identity: I) -> Result<T, E>
    where
        T: Send,
        E: Send + From<LedgerError>,
        M: Fn(Transaction<'a>) -> Result<T, E> + Sync,
        C: Fn(T, T) -> T + Sync,
        I: Fn() -> T + Sync,
    {
        try_map_reduce(
            *self,
            |segment: BlockRange<'a>| try_fold_txes(segment.txes().iter(), identity(), &map, &combine),
            &combine,
            &identity,
        )
    }

    /// Map every block in parallel, returning results in height order.
    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Block<'a>) -> T + Sync,
    {
        let mut tagged = self.map_reduce(|block| vec![(block.height(), f(block))], concat, Vec::new);
        tagged.sort_unstable_by_key(|(height, _)| *height);
        tagged.into_iter().map(|(_, value)| value).collect()
    }

    /// Blocks matching `pred`, in height order.
    pub fn filter_blocks<F>(&self, pred: F) -> Vec<Block<'a>>
    where
        F: Fn(&Block<'a>) -> bool + Sync,
    {
        let mut blocks = self.map_reduce(
            |block| if pred(&block) { vec![block] } else { Vec::new() },
            concat,
            Vec::new,
        );
        blocks.sort_unstable_by_key(|b| b.height());
        blocks
    }

    /// Transactions matching `pred`, in chain order.
    pub fn filter_txes<F>(&self, pred: F) -> Vec<Transaction<'a>>
    where
        F: Fn(&Transaction<'a>) -> bool + Sync,
    {
        let mut txes = self.map_reduce_txes(|tx| if pred(&tx) { vec![tx] } else { Vec::new() }, concat, Vec::new);
        txes.sort_unstable_by_key(|tx| tx.tx_num());
        txes
    }

    /// Propagate the first read failure from any block's transactions.
    pub fn try_for_each_tx<F>(&self, f: F) -> Result<(), LedgerError>
    where
        F: Fn(Transaction<'a>) -> Result<(), LedgerError> + Sync,
    {
        self.try_map_reduce_txes(f, |(), ()| (), || ())
    }
}

impl<'a> TransactionRange<'a> {
    /// Map each transaction and combine, splitting by exact transaction
    /// count.
    pub fn map_reduce<R, M, C, I>(&self, map: M, combine: C, identity: I) -> R
    where
        R: Send,
        M: Fn(Transaction<'a>) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
        I: Fn() -> R + Sync,
    {
        map_reduce(
            *self,
            |segment: TransactionRange<'a>| segment.iter().fold(identity(), |acc, tx| combine(acc, map(tx))),
            &combine,
            &identity,
        )
    }

    pub fn try_map_reduce<T, E, M, C, I>(&self, map: M, combine: C, identity: I) -> Result<T, E>
    where
        T: Send,
        E: Send + From<LedgerError>,
        M: Fn(Transaction<'a>) -> Result<T, E> + Sync,
        C: Fn(T, T) -> T + Sync,
        I: Fn() -> T + Sync,
    {
        try_map_reduce(
            *self,
            |segment: TransactionRange<'a>| try_fold_txes(segment.iter(), identity(), &map, &combine),
            &combine,
            &identity,
        )
    }
}

fn try_fold_blocks<'a, T, E, M, C>(mut blocks: Blocks<'a>, init: T, map: &M, combine: &C) -> Result<T, E>
where
    E: From<LedgerError>,
    M: Fn(Block<'a>) -> Result<T, E>,
    C: Fn(T, T) -> T,
{
    let mut acc = init;
    while let Some(block) = blocks.try_next()? {
        acc = combine(acc, map(block)?);
    }
    Ok(acc)
}

fn try_fold_txes<'a, T, E, M, C>(mut txes: Transactions<'a>, init: T, map: &M, combine: &C) -> Result<T, E>
where
    E: From<LedgerError>,
    M: Fn(Transaction<'a>) -> Result<T, E>,
    C: Fn(T, T) -> T,
{
    let mut acc = init;
    while let Some(tx) = txes.try_next()? {
        acc = combine(acc, map(tx)?);
    }
    Ok(acc)
}

fn concat<T>(mut a: Vec<T>, mut b: Vec<T>) -> Vec<T> {
    if a.len() < b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    a.append(&mut b);
    a
}
