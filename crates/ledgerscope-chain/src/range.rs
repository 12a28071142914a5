//! Half-open block and transaction ranges.
//!
//! Iteration over a [`TransactionRange`] runs on a [`TxCursor`], which caches
//! the byte offset of the current record and the `[first, next)` transaction
//! window of the block containing it. Linear steps update both incrementally;
//! jumps recompute them from the offset index and a binary search over block
//! first-transaction indices.
//!
//! Range iterators yield values rather than `Result`s. A read failure during
//! iteration is logged and ends the iteration. Callers that must see the
//! failure step with `try_next`, or use the checked accessors
//! ([`BlockRange::get`], [`TransactionRange::get`]).

use std::fmt;
use std::ops::Range;

use ledgerscope_core::error::{ChainError, LedgerError};
use ledgerscope_store::ChainAccess;

use crate::block::Block;
use crate::transaction::Transaction;

fn check_bounds(what: &'static str, start: u32, stop: u32, bound: u32) -> Result<(), ChainError> {
    if stop > bound {
        return Err(ChainError::out_of_range(what, stop, bound));
    }
    if start > stop {
        return Err(ChainError::out_of_range(what, start, stop));
    }
    Ok(())
}

/// First transaction index of `height`, or the chain's transaction count at
/// the tip.
fn first_tx_at(chain: &ChainAccess, height: u32) -> u32 {
    if height >= chain.block_count() {
        return chain.tx_count();
    }
    chain
        .block(height)
        .map_or_else(|_| chain.tx_count(), |b| b.first_tx_index())
}

// --- Cursor ---

/// Position in the transaction data file.
#[derive(Clone, Copy, Debug)]
pub struct TxCursor<'a> {
    chain: &'a ChainAccess,
    tx_num: u32,
    offset: u64,
    block_height: u32,
    block_first: u32,
    next_block_first: u32,
}

impl<'a> TxCursor<'a> {
    /// Position at `tx_num`, searching for its block.
    pub fn seek(chain: &'a ChainAccess, tx_num: u32) -> Result<Self, LedgerError> {
        let height = chain.block_height_of(tx_num)?;
        Self::seek_in_block(chain, tx_num, height)
    }

    /// Position at `tx_num`, known to lie in block `height`.
    pub fn seek_in_block(chain: &'a ChainAccess, tx_num: u32, height: u32) -> Result<Self, LedgerError> {
        let block = chain.block(height)?;
        if tx_num < block.first_tx_index() || tx_num >= block.end_tx_index() {
            return Err(ChainError::out_of_range("tx in block", tx_num, block.end_tx_index()).into());
        }
        Ok(Self {
            chain,
            tx_num,
            offset: chain.tx_offset(tx_num)?,
            block_height: height,
            block_first: block.first_tx_index(),
            next_block_first: block.end_tx_index(),
        })
    }

    pub fn tx_num(&self) -> u32 {
        self.tx_num
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    /// Transaction numbers of the block under the cursor.
    pub fn block_window(&self) -> Range<u32> {
        self.block_first..self.next_block_first
    }

    /// Transaction under the cursor.
    pub fn current(&self) -> Result<Transaction<'a>, LedgerError> {
        let record = self.chain.tx_at(self.offset)?;
        Ok(Transaction::from_parts(self.chain, record, self.tx_num, self.block_height))
    }

    /// Step to the following transaction. Moving past the last transaction
    /// leaves the cursor one past the end, where `current` fails.
    pub fn advance(&mut self) -> Result<(), LedgerError> {
        let record = self.chain.tx_at(self.offset)?;
        self.offset = ChainAccess::advance(self.offset, &record);
        self.tx_num += 1;
        let last_height = self.chain.block_count().saturating_sub(1);
        while self.tx_num >= self.next_block_first && self.block_height < last_height {
            self.block_height += 1;
            let block = self.chain.block(self.block_height)?;
            self.block_first = block.first_tx_index();
            self.next_block_first = block.end_tx_index();
        }
        Ok(())
    }

    /// Step to the preceding transaction.
    pub fn step_back(&mut self) -> Result<(), LedgerError> {
        let prev = self
            .tx_num
            .checked_sub(1)
            .ok_or_else(|| ChainError::out_of_range("tx", 0u32, 0u32))?;
        self.offset = self.chain.tx_offset(prev)?;
        self.tx_num = prev;
        while self.tx_num < self.block_first {
            self.block_height -= 1;
            let block = self.chain.block(self.block_height)?;
            self.block_first = block.first_tx_index();
            self.next_block_first = block.end_tx_index();
        }
        Ok(())
    }

    /// Jump to `tx_num`, recomputing the block window from scratch.
    pub fn jump(&mut self, tx_num: u32) -> Result<(), LedgerError> {
        *self = Self::seek(self.chain, tx_num)?;
        Ok(())
    }
}

// --- Transactions ---

/// Transactions `[start, stop)` in chain order.
#[derive(Clone, Copy)]
pub struct TransactionRange<'a> {
    chain: &'a ChainAccess,
    start: u32,
    stop: u32,
    /// Height of the block holding `start`, when known.
    start_height: Option<u32>,
}

impl<'a> TransactionRange<'a> {
    pub fn new(chain: &'a ChainAccess, start: u32, stop: u32) -> Result<Self, ChainError> {
        check_bounds("tx", start, stop, chain.tx_count())?;
        Ok(Self {
            chain,
            start,
            stop,
            start_height: None,
        })
    }

    /// Every visible transaction.
    pub fn all(chain: &'a ChainAccess) -> Self {
        Self {
            chain,
            start: 0,
            stop: chain.tx_count(),
            start_height: None,
        }
    }

    pub(crate) fn within_block(chain: &'a ChainAccess, start: u32, stop: u32, height: u32) -> Self {
        Self {
            chain,
            start,
            stop,
            start_height: Some(height),
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stop(&self) -> u32 {
        self.stop
    }

    pub fn len(&self) -> u32 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn chain(&self) -> &'a ChainAccess {
        self.chain
    }

    /// Transaction at position `index` within the range.
    pub fn get(&self, index: u32) -> Result<Transaction<'a>, LedgerError> {
        if index >= self.len() {
            return Err(ChainError::out_of_range("tx in range", index, self.len()).into());
        }
        Transaction::load(self.chain, self.start + index)
    }

    /// Sub-range at positions `range` relative to this one.
    pub fn slice(&self, range: Range<u32>) -> Result<Self, ChainError> {
        check_bounds("tx in range", range.start, range.end, self.len())?;
        Ok(Self {
            chain: self.chain,
            start: self.start + range.start,
            stop: self.start + range.end,
            start_height: None,
        })
    }

    pub fn iter(&self) -> Transactions<'a> {
        Transactions {
            range: *self,
            front: self.start,
            back: self.stop,
            front_cursor: None,
            back_cursor: None,
        }
    }

    /// Split into at most `n` contiguous, non-empty ranges whose lengths
    /// differ by at most one.
    pub fn segment(&self, n: usize) -> Vec<Self> {
        let len = self.len() as usize;
        let parts = n.clamp(1, len.max(1));
        if parts == 1 {
            return vec![*self];
        }
        let (base, extra) = (len / parts, len % parts);
        let mut start = self.start;
        (0..parts)
            .map(|i| {
                let size = (base + usize::from(i < extra)) as u32;
                let segment = Self {
                    chain: self.chain,
                    start,
                    stop: start + size,
                    start_height: None,
                };
                start += size;
                segment
            })
            .collect()
    }
}

impl fmt::Debug for TransactionRange<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionRange({}..{})", self.start, self.stop)
    }
}

impl<'a> IntoIterator for TransactionRange<'a> {
    type Item = Transaction<'a>;
    type IntoIter = Transactions<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &TransactionRange<'a> {
    type Item = Transaction<'a>;
    type IntoIter = Transactions<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`TransactionRange`].
#[derive(Clone)]
pub struct Transactions<'a> {
    range: TransactionRange<'a>,
    front: u32,
    back: u32,
    front_cursor: Option<TxCursor<'a>>,
    back_cursor: Option<TxCursor<'a>>,
}

impl<'a> Transactions<'a> {
    /// Next transaction from the front, or the read failure that prevents
    /// it. The iterator is exhausted after an error.
    pub fn try_next(&mut self) -> Result<Option<Transaction<'a>>, LedgerError> {
        if self.front >= self.back {
            return Ok(None);
        }
        let step = self.front_cursor().and_then(|mut cursor| {
            let tx = cursor.current()?;
            cursor.advance()?;
            Ok((tx, cursor))
        });
        match step {
            Ok((tx, cursor)) => {
                self.front += 1;
                self.front_cursor = Some(cursor);
                Ok(Some(tx))
            }
            Err(err) => {
                self.front = self.back;
                Err(err)
            }
        }
    }

    fn stop_on(&mut self, err: LedgerError) -> Option<Transaction<'a>> {
        tracing::error!(front = self.front, back = self.back, error = %err, "transaction iteration stopped");
        self.front = self.back;
        None
    }

    fn front_cursor(&mut self) -> Result<TxCursor<'a>, LedgerError> {
        match self.front_cursor {
            Some(cursor) if cursor.tx_num() == self.front => Ok(cursor),
            _ => match self.range.start_height {
                Some(height) if self.front == self.range.start => {
                    TxCursor::seek_in_block(self.range.chain, self.front, height)
                }
                _ => TxCursor::seek(self.range.chain, self.front),
            },
        }
    }
}

impl<'a> Iterator for Transactions<'a> {
    type Item = Transaction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().unwrap_or_else(|err| self.stop_on(err))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back.saturating_sub(self.front) as usize;
        (len, Some(len))
    }

    /// Skips by jumping: the cursor is re-seeked rather than walked.
    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let remaining = self.back.saturating_sub(self.front) as usize;
        if n >= remaining {
            self.front = self.back;
            return None;
        }
        self.front += n as u32;
        if n > 0 {
            self.front_cursor = None;
        }
        self.next()
    }
}

impl DoubleEndedIterator for Transactions<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let target = self.back - 1;
        let step = match self.back_cursor {
            Some(mut cursor) if cursor.tx_num() == self.back => cursor.step_back().map(|()| cursor),
            _ => TxCursor::seek(self.range.chain, target),
        }
        .and_then(|cursor| Ok((cursor.current()?, cursor)));
        match step {
            Ok((tx, cursor)) => {
                self.back = target;
                self.back_cursor = Some(cursor);
                Some(tx)
            }
            Err(err) => self.stop_on(err),
        }
    }
}

impl ExactSizeIterator for Transactions<'_> {}

// --- Blocks ---

/// Blocks at heights `[start, stop)`.
#[derive(Clone, Copy)]
pub struct BlockRange<'a> {
    chain: &'a ChainAccess,
    start: u32,
    stop: u32,
}

impl<'a> BlockRange<'a> {
    pub fn new(chain: &'a ChainAccess, start: u32, stop: u32) -> Result<Self, ChainError> {
        check_bounds("height", start, stop, chain.block_count())?;
        Ok(Self { chain, start, stop })
    }

    /// Every visible block.
    pub fn all(chain: &'a ChainAccess) -> Self {
        Self {
            chain,
            start: 0,
            stop: chain.block_count(),
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stop(&self) -> u32 {
        self.stop
    }

    pub fn len(&self) -> u32 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn chain(&self) -> &'a ChainAccess {
        self.chain
    }

    /// Block at position `index` within the range.
    pub fn get(&self, index: u32) -> Result<Block<'a>, LedgerError> {
        if index >= self.len() {
            return Err(ChainError::out_of_range("height in range", index, self.len()).into());
        }
        Block::new(self.chain, self.start + index)
    }

    /// Sub-range at positions `range` relative to this one.
    pub fn slice(&self, range: Range<u32>) -> Result<Self, ChainError> {
        check_bounds("height in range", range.start, range.end, self.len())?;
        Ok(Self {
            chain: self.chain,
            start: self.start + range.start,
            stop: self.start + range.end,
        })
    }

    pub fn iter(&self) -> Blocks<'a> {
        Blocks {
            chain: self.chain,
            front: self.start,
            back: self.stop,
        }
    }

    pub fn first_tx_index(&self) -> u32 {
        first_tx_at(self.chain, self.start)
    }

    pub fn end_tx_index(&self) -> u32 {
        first_tx_at(self.chain, self.stop)
    }

    pub fn total_tx_count(&self) -> u32 {
        self.end_tx_index() - self.first_tx_index()
    }

    /// Every transaction of every block in the range.
    pub fn txes(&self) -> TransactionRange<'a> {
        let (start, stop) = (self.first_tx_index(), self.end_tx_index());
        TransactionRange {
            chain: self.chain,
            start,
            stop,
            start_height: None,
        }
    }

    /// Split into at most `n` contiguous, non-empty block ranges of roughly
    /// equal transaction count.
    ///
    /// Boundary `k` is the first block whose first transaction index reaches
    /// `first + total * k / n`. Boundaries that land on the same block
    /// collapse, so a block larger than `total / n` yields fewer segments.
    /// Every segment holds at most `ceil(total / n) + max_block_txes - 1`
    /// transactions.
    pub fn segment(&self, n: usize) -> Vec<Self> {
        if n <= 1 || self.len() <= 1 {
            return vec![*self];
        }
        let first = u64::from(self.first_tx_index());
        let total = u64::from(self.end_tx_index()) - first;
        let mut segments = Vec::with_capacity(n);
        let mut prev = self.start;
        for k in 1..n as u64 {
            let target = (first + total * k / n as u64) as u32;
            let boundary = self.chain.lower_bound_first_tx(prev, self.stop, target);
            if boundary >= self.stop {
                break;
            }
            if boundary == prev {
                continue;
            }
            segments.push(Self {
                chain: self.chain,
                start: prev,
                stop: boundary,
            });
            prev = boundary;
        }
        segments.push(Self {
            chain: self.chain,
            start: prev,
            stop: self.stop,
        });
        tracing::trace!(requested = n, produced = segments.len(), txes = total, "segmented block range");
        segments
    }
}

impl fmt::Debug for BlockRange<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRange({}..{})", self.start, self.stop)
    }
}

impl<'a> IntoIterator for BlockRange<'a> {
    type Item = Block<'a>;
    type IntoIter = Blocks<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &BlockRange<'a> {
    type Item = Block<'a>;
    type IntoIter = Blocks<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`BlockRange`].
#[derive(Clone)]
pub struct Blocks<'a> {
    chain: &'a ChainAccess,
    front: u32,
    back: u32,
}

impl<'a> Blocks<'a> {
    /// Next block from the front, or the read failure that prevents it.
    pub fn try_next(&mut self) -> Result<Option<Block<'a>>, LedgerError> {
        if self.front >= self.back {
            return Ok(None);
        }
        match Block::new(self.chain, self.front) {
            Ok(block) => {
                self.front += 1;
                Ok(Some(block))
            }
            Err(err) => {
                self.front = self.back;
                Err(err)
            }
        }
    }

    fn load(&mut self, height: u32) -> Option<Block<'a>> {
        match Block::new(self.chain, height) {
            Ok(block) => Some(block),
            Err(err) => {
                tracing::error!(height, error = %err, "block iteration stopped");
                self.front = self.back;
                None
            }
        }
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let height = self.front;
        self.front += 1;
        self.load(height)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back.saturating_sub(self.front) as usize;
        (len, Some(len))
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let remaining = self.back.saturating_sub(self.front) as usize;
        if n >= remaining {
            self.front = self.back;
            return None;
        }
        self.front += n as u32;
        self.next()
    }
}

impl DoubleEndedIterator for Blocks<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.load(self.back)
    }
}

impl ExactSizeIterator for Blocks<'_> {}
