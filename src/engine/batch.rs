//! Batch planning
//!
//! Splits input into batches of at most `max_batch_size` elements while
//! guaranteeing at least `min_batch_count` batches whenever the input has
//! that many elements. Only the first `min_batch_count` chunks are pulled
//! up front, so long or unbounded inputs stay lazy.

use crate::error::{MapError, MapResult};
use std::collections::VecDeque;
use tracing::debug;

/// Fixed-size chunking of an iterator; the last chunk may be short
pub struct Chunks<I: Iterator> {
    iter: I,
    size: usize,
}

impl<I: Iterator> Chunks<I> {
    pub fn new(iter: I, size: usize) -> Self {
        Self {
            iter,
            size: size.max(1),
        }
    }
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<_> = self.iter.by_ref().take(self.size).collect();
        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}

/// Batches produced by [`batch_split`], in input order
pub enum BatchSplit<I: Iterator> {
    /// Enough chunks were found: buffered head, then the rest on demand
    Planned {
        head: VecDeque<Vec<I::Item>>,
        tail: Chunks<I>,
    },
    /// Input was short and fully buffered; re-partitioned more finely
    Rebalanced(std::vec::IntoIter<Vec<I::Item>>),
}

impl<I: Iterator> Iterator for BatchSplit<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchSplit::Planned { head, tail } => head.pop_front().or_else(|| tail.next()),
            BatchSplit::Rebalanced(batches) => batches.next(),
        }
    }
}

/// Split `items` into batches for dispatch
///
/// Fails without consuming `items` if either bound is below 1.
pub fn batch_split<I>(
    items: I,
    min_batch_count: usize,
    max_batch_size: usize,
) -> MapResult<BatchSplit<I::IntoIter>>
where
    I: IntoIterator,
{
    if min_batch_count < 1 {
        return Err(MapError::invalid(
            "min_batch_count",
            min_batch_count,
            "must be at least 1",
        ));
    }
    if max_batch_size < 1 {
        return Err(MapError::invalid(
            "max_batch_size",
            max_batch_size,
            "must be at least 1",
        ));
    }

    let mut chunks = Chunks::new(items.into_iter(), max_batch_size);
    let head: VecDeque<_> = chunks.by_ref().take(min_batch_count).collect();

    if head.len() >= min_batch_count {
        return Ok(BatchSplit::Planned { head, tail: chunks });
    }

    // The whole input is in `head`
    let total: usize = head.iter().map(Vec::len).sum();
    let batch_size = (total / min_batch_count).max(1);
    debug!(
        "Rebalancing {} elements into batches of {} (wanted at least {} batches)",
        total, batch_size, min_batch_count
    );
    let batches: Vec<_> = Chunks::new(head.into_iter().flatten(), batch_size).collect();
    Ok(BatchSplit::Rebalanced(batches.into_iter()))
}
