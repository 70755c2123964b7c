//! Lazy decompression cursors over compressed adjacency lists

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::graph::compressed::CompressedAdjacencyList;
use crate::graph::varint::decode_deltas;

/// Returned by cursor operations once no qualifying target is left
pub const NOT_FOUND: u64 = u64::MAX;

/// Values decoded per decompression window
pub const BLOCK_SIZE: usize = 64;

/// Read access to one node's ascending targets.
///
/// `peek_v` never consumes. `skip_until(t)` consumes up to and including the
/// first target `> t` and returns it; `advance(t)` does the same for the first
/// target `>= t`. Both return [`NOT_FOUND`] when the targets run out.
pub trait NeighborCursor {
    /// Degree of the node the cursor is bound to
    fn size(&self) -> usize;

    /// Targets not consumed yet
    fn remaining(&self) -> usize;

    fn peek_v(&mut self) -> u64;

    fn next_v(&mut self) -> u64;

    fn has_next_v(&self) -> bool {
        self.remaining() > 0
    }

    fn skip_until(&mut self, target: u64) -> u64 {
        loop {
            let value = self.next_v();
            if value == NOT_FOUND || value > target {
                return value;
            }
        }
    }

    fn advance(&mut self, target: u64) -> u64 {
        loop {
            let value = self.next_v();
            if value == NOT_FOUND || value >= target {
                return value;
            }
        }
    }
}

/// Cursor over a single node's byte run, decoding one block at a time
#[derive(Debug, Clone)]
pub struct AdjacencyCursor<'a> {
    list: &'a CompressedAdjacencyList,
    bytes: &'a [u8],
    pos: usize,
    degree: usize,
    undecoded: usize,
    block: [u64; BLOCK_SIZE],
    block_len: usize,
    block_idx: usize,
    last: u64,
}

impl<'a> AdjacencyCursor<'a> {
    pub(crate) fn new(list: &'a CompressedAdjacencyList) -> Self {
        Self {
            list,
            bytes: &[],
            pos: 0,
            degree: 0,
            undecoded: 0,
            block: [0; BLOCK_SIZE],
            block_len: 0,
            block_idx: 0,
            last: 0,
        }
    }

    /// Rebind the cursor to `node`, discarding any previous state
    pub fn init(&mut self, node: u64) {
        let (bytes, offset, degree) = self.list.run(node);
        self.bytes = bytes;
        self.pos = offset;
        self.degree = degree;
        self.undecoded = degree;
        self.block_len = 0;
        self.block_idx = 0;
        self.last = 0;
    }

    /// Values left in the current decompression window
    pub fn window_remaining(&self) -> usize {
        self.block_len - self.block_idx
    }

    fn refill(&mut self) -> bool {
        if self.undecoded == 0 {
            return false;
        }
        let count = self.undecoded.min(BLOCK_SIZE);
        self.pos = decode_deltas(self.bytes, self.pos, self.last, &mut self.block[..count]);
        self.last = self.block[count - 1];
        self.block_len = count;
        self.block_idx = 0;
        self.undecoded -= count;
        true
    }

    #[inline]
    fn ensure_window(&mut self) -> bool {
        self.block_idx < self.block_len || self.refill()
    }
}

impl NeighborCursor for AdjacencyCursor<'_> {
    fn size(&self) -> usize {
        self.degree
    }

    fn remaining(&self) -> usize {
        self.window_remaining() + self.undecoded
    }

    #[inline]
    fn peek_v(&mut self) -> u64 {
        if !self.ensure_window() {
            return NOT_FOUND;
        }
        self.block[self.block_idx]
    }

    #[inline]
    fn next_v(&mut self) -> u64 {
        if !self.ensure_window() {
            return NOT_FOUND;
        }
        let value = self.block[self.block_idx];
        self.block_idx += 1;
        value
    }

    fn skip_until(&mut self, target: u64) -> u64 {
        while self.ensure_window() {
            // Whole window at or below the target
            if self.block[self.block_len - 1] <= target {
                self.block_idx = self.block_len;
                continue;
            }
            while self.block[self.block_idx] <= target {
                self.block_idx += 1;
            }
            let value = self.block[self.block_idx];
            self.block_idx += 1;
            return value;
        }
        NOT_FOUND
    }

    fn advance(&mut self, target: u64) -> u64 {
        while self.ensure_window() {
            if self.block[self.block_len - 1] < target {
                self.block_idx = self.block_len;
                continue;
            }
            while self.block[self.block_idx] < target {
                self.block_idx += 1;
            }
            let value = self.block[self.block_idx];
            self.block_idx += 1;
            return value;
        }
        NOT_FOUND
    }
}

impl Iterator for AdjacencyCursor<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self.next_v() {
            NOT_FOUND => None,
            value => Some(value),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// Merges several sorted cursors into one sorted stream
///
/// The heap is keyed on each sub-cursor's peek value. Sub-cursors must yield
/// non-decreasing values; a violation panics since it would corrupt every
/// merge-join built on top of this cursor.
#[derive(Debug, Clone)]
pub struct CompositeAdjacencyCursor<'a> {
    cursors: Vec<AdjacencyCursor<'a>>,
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

impl<'a> CompositeAdjacencyCursor<'a> {
    pub fn new(mut cursors: Vec<AdjacencyCursor<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (index, cursor) in cursors.iter_mut().enumerate() {
            let head = cursor.peek_v();
            if head != NOT_FOUND {
                heap.push(Reverse((head, index)));
            }
        }
        Self { cursors, heap }
    }

    /// Rebind every sub-cursor to `node`
    pub fn init(&mut self, node: u64) {
        self.heap.clear();
        for (index, cursor) in self.cursors.iter_mut().enumerate() {
            cursor.init(node);
            let head = cursor.peek_v();
            if head != NOT_FOUND {
                self.heap.push(Reverse((head, index)));
            }
        }
    }
}

impl NeighborCursor for CompositeAdjacencyCursor<'_> {
    fn size(&self) -> usize {
        self.cursors.iter().map(|cursor| cursor.size()).sum()
    }

    fn remaining(&self) -> usize {
        self.cursors.iter().map(|cursor| cursor.remaining()).sum()
    }

    fn peek_v(&mut self) -> u64 {
        self.heap
            .peek()
            .map(|Reverse((value, _))| *value)
            .unwrap_or(NOT_FOUND)
    }

    fn next_v(&mut self) -> u64 {
        let Some(Reverse((value, index))) = self.heap.pop() else {
            return NOT_FOUND;
        };
        let cursor = &mut self.cursors[index];
        cursor.next_v();
        let following = cursor.peek_v();
        if following != NOT_FOUND {
            assert!(
                following >= value,
                "sub-cursor {} is not sorted: {} follows {}",
                index,
                following,
                value
            );
            self.heap.push(Reverse((following, index)));
        }
        value
    }
}

/// Cursor handed out by a graph: a plain cursor for one relationship type,
/// a merging cursor for several
#[derive(Debug, Clone)]
pub enum GraphCursor<'a> {
    Single(AdjacencyCursor<'a>),
    Composite(CompositeAdjacencyCursor<'a>),
}

impl GraphCursor<'_> {
    pub fn init(&mut self, node: u64) {
        match self {
            GraphCursor::Single(cursor) => cursor.init(node),
            GraphCursor::Composite(cursor) => cursor.init(node),
        }
    }
}

impl NeighborCursor for GraphCursor<'_> {
    fn size(&self) -> usize {
        match self {
            GraphCursor::Single(cursor) => cursor.size(),
            GraphCursor::Composite(cursor) => cursor.size(),
        }
    }

    fn remaining(&self) -> usize {
        match self {
            GraphCursor::Single(cursor) => cursor.remaining(),
            GraphCursor::Composite(cursor) => cursor.remaining(),
        }
    }

    fn peek_v(&mut self) -> u64 {
        match self {
            GraphCursor::Single(cursor) => cursor.peek_v(),
            GraphCursor::Composite(cursor) => cursor.peek_v(),
        }
    }

    fn next_v(&mut self) -> u64 {
        match self {
            GraphCursor::Single(cursor) => cursor.next_v(),
            GraphCursor::Composite(cursor) => cursor.next_v(),
        }
    }

    fn skip_until(&mut self, target: u64) -> u64 {
        match self {
            GraphCursor::Single(cursor) => cursor.skip_until(target),
            GraphCursor::Composite(cursor) => cursor.skip_until(target),
        }
    }

    fn advance(&mut self, target: u64) -> u64 {
        match self {
            GraphCursor::Single(cursor) => cursor.advance(target),
            GraphCursor::Composite(cursor) => cursor.advance(target),
        }
    }
}

impl Iterator for GraphCursor<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self.next_v() {
            NOT_FOUND => None,
            value => Some(value),
        }
    }
}

/// Number of values present in both cursors, counting duplicates once per match
pub fn intersection_size<A: NeighborCursor, B: NeighborCursor>(left: &mut A, right: &mut B) -> usize {
    let mut count = 0;
    let mut a = left.next_v();
    let mut b = right.next_v();
    while a != NOT_FOUND && b != NOT_FOUND {
        if a == b {
            count += 1;
            a = left.next_v();
            b = right.next_v();
        } else if a < b {
            a = left.advance(b);
        } else {
            b = right.advance(a);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn list(lists: Vec<Vec<u64>>) -> CompressedAdjacencyList {
        CompressedAdjacencyList::from_sorted_lists(lists)
    }

    #[test]
    fn test_peek_does_not_consume() {
        let adjacency = list(vec![vec![4, 8]]);
        let mut cursor = adjacency.cursor(0);
        assert_eq!(cursor.size(), 2);
        assert_eq!(cursor.peek_v(), 4);
        assert_eq!(cursor.peek_v(), 4);
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.next_v(), 4);
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.next_v(), 8);
        assert!(!cursor.has_next_v());
        assert_eq!(cursor.next_v(), NOT_FOUND);
        assert_eq!(cursor.peek_v(), NOT_FOUND);
    }

    #[test]
    fn test_multiset_is_preserved() {
        let adjacency = list(vec![vec![0, 1, 1, 2]]);
        assert_eq!(adjacency.cursor(0).collect::<Vec<_>>(), vec![0, 1, 1, 2]);

        let mut cursor = adjacency.cursor(0);
        assert_eq!(cursor.skip_until(1), 2);
        assert_eq!(cursor.next_v(), NOT_FOUND);

        let mut cursor = adjacency.cursor(0);
        assert_eq!(cursor.advance(1), 1);
        assert_eq!(cursor.next_v(), 1);
        assert_eq!(cursor.next_v(), 2);
    }

    #[test]
    fn test_skip_and_advance_across_windows() {
        let targets: Vec<u64> = (0..500).map(|value| value * 3).collect();
        let adjacency = list(vec![targets]);

        let mut cursor = adjacency.cursor(0);
        assert_eq!(cursor.skip_until(299), 300);
        assert_eq!(cursor.advance(301), 303);
        assert_eq!(cursor.skip_until(303), 306);
        assert_eq!(cursor.remaining(), 500 - 103);
        assert_eq!(cursor.advance(1497), 1497);
        assert_eq!(cursor.skip_until(1497), NOT_FOUND);
    }

    #[test]
    fn test_window_is_bounded() {
        let adjacency = list(vec![(0..200).collect()]);
        let mut cursor = adjacency.cursor(0);
        cursor.next_v();
        assert_eq!(cursor.window_remaining(), BLOCK_SIZE - 1);
        assert_eq!(cursor.remaining(), 199);
    }

    #[test]
    fn test_reinit_moves_between_nodes() {
        let adjacency = list(vec![vec![1, 2], vec![], vec![7]]);
        let mut cursor = adjacency.raw_cursor();
        assert_eq!(cursor.next_v(), NOT_FOUND);
        cursor.init(2);
        assert_eq!(cursor.next_v(), 7);
        cursor.init(1);
        assert_eq!(cursor.size(), 0);
        cursor.init(0);
        assert_eq!(cursor.collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_composite_merges_sorted() {
        let first = list(vec![vec![1, 4, 9, 12]]);
        let second = list(vec![vec![2, 4, 10]]);
        let third = list(vec![vec![]]);
        let mut cursor =
            CompositeAdjacencyCursor::new(vec![first.cursor(0), second.cursor(0), third.cursor(0)]);

        assert_eq!(cursor.size(), 7);
        assert_eq!(cursor.peek_v(), 1);
        assert_eq!(cursor.skip_until(4), 9);
        assert_eq!(cursor.advance(10), 10);
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.next_v(), 12);
        assert_eq!(cursor.next_v(), NOT_FOUND);

        let merged: Vec<u64> = GraphCursor::Composite(CompositeAdjacencyCursor::new(vec![
            first.cursor(0),
            second.cursor(0),
        ]))
        .collect();
        let expected: Vec<u64> = [vec![1, 4, 9, 12], vec![2, 4, 10]]
            .into_iter()
            .kmerge()
            .collect();
        assert_eq!(merged, expected);
    }

    #[test]
    #[should_panic(expected = "not sorted")]
    fn test_composite_rejects_unsorted_input() {
        // Bypass the compressor to plant a descending run: the second gap wraps to 3
        let mut bytes = Vec::new();
        crate::graph::varint::encode_values(&[5, u64::MAX - 1], &mut bytes);
        let broken = CompressedAdjacencyList::new(
            vec![bytes.into_boxed_slice()],
            crate::memory::HugeIntArray::from_fn(1, |_| 2),
            crate::memory::HugeLongArray::new(1),
        );
        let other = list(vec![vec![3]]);
        let mut cursor = CompositeAdjacencyCursor::new(vec![broken.cursor(0), other.cursor(0)]);
        while cursor.next_v() != NOT_FOUND {}
    }

    #[test]
    fn test_intersection_size() {
        let adjacency = list(vec![vec![1, 3, 5, 7, 9], vec![2, 3, 4, 9, 10]]);
        let mut left = adjacency.cursor(0);
        let mut right = adjacency.cursor(1);
        assert_eq!(intersection_size(&mut left, &mut right), 2);
    }

    #[test]
    fn test_intersection_size_interleaved_heads() {
        let adjacency = list(vec![vec![5, 9], vec![4, 9], vec![]]);
        let (mut left, mut right) = (adjacency.cursor(0), adjacency.cursor(1));
        assert_eq!(intersection_size(&mut left, &mut right), 1);

        let (mut left, mut right) = (adjacency.cursor(1), adjacency.cursor(0));
        assert_eq!(intersection_size(&mut left, &mut right), 1);

        let (mut left, mut right) = (adjacency.cursor(2), adjacency.cursor(0));
        assert_eq!(intersection_size(&mut left, &mut right), 0);

        let long: Vec<u64> = (0..300).collect();
        let adjacency = list(vec![long, vec![1, 2, 3, 70, 200, 299]]);
        let (mut left, mut right) = (adjacency.cursor(1), adjacency.cursor(0));
        assert_eq!(intersection_size(&mut left, &mut right), 6);
    }
}
