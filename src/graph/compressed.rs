//! Memory-efficient adjacency representation
//!
//! Every node owns one byte run holding its ascending targets as varint
//! encoded gaps. Runs are packed into byte pages and never straddle a page
//! boundary; a run larger than a page gets an oversized page of its own.

use std::mem;

use crate::graph::cursor::AdjacencyCursor;
use crate::graph::varint::{delta_encode, encode_values, encoded_size_of, MAX_ENCODED_SIZE};
use crate::memory::{HugeIntArray, HugeLongArray, MemoryRange};

/// Target size of a byte page
pub const PAGE_SIZE_BYTES: usize = 1 << 18;

const OFFSET_BITS: u32 = 32;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Pack a page index and an offset inside that page
#[inline]
pub(crate) fn address(page: usize, offset: usize) -> u64 {
    ((page as u64) << OFFSET_BITS) | offset as u64
}

/// Shift an address produced by a local compressor behind `page_base` earlier pages
#[inline]
pub(crate) fn rebase(address: u64, page_base: usize) -> u64 {
    address + ((page_base as u64) << OFFSET_BITS)
}

#[inline]
fn unpack(address: u64) -> (usize, usize) {
    ((address >> OFFSET_BITS) as usize, (address & OFFSET_MASK) as usize)
}

/// Compressed, immutable adjacency of one relationship type
#[derive(Debug)]
pub struct CompressedAdjacencyList {
    /// Byte pages holding the encoded runs
    pages: Vec<Box<[u8]>>,

    /// Number of encoded targets per node
    degrees: HugeIntArray,

    /// Packed (page, offset) location of each node's run
    addresses: HugeLongArray,

    /// Total number of encoded targets
    relationship_count: u64,
}

impl CompressedAdjacencyList {
    pub(crate) fn new(
        pages: Vec<Box<[u8]>>,
        degrees: HugeIntArray,
        addresses: HugeLongArray,
    ) -> Self {
        let relationship_count = degrees.iter().map(u64::from).sum();
        Self {
            pages,
            degrees,
            addresses,
            relationship_count,
        }
    }

    /// Compress already sorted adjacency lists on the calling thread
    pub fn from_sorted_lists(mut lists: Vec<Vec<u64>>) -> Self {
        let node_count = lists.len() as u64;
        let mut degrees = HugeIntArray::new(node_count);
        let mut addresses = HugeLongArray::new(node_count);
        let mut compressor = AdjacencyCompressor::new();

        for (node, targets) in lists.iter_mut().enumerate() {
            let (address, degree) = compressor.compress(targets);
            degrees.set(node as u64, degree);
            addresses.set(node as u64, address);
        }

        Self::new(compressor.finish(), degrees, addresses)
    }

    pub fn node_count(&self) -> u64 {
        self.degrees.size()
    }

    pub fn relationship_count(&self) -> u64 {
        self.relationship_count
    }

    #[inline]
    pub fn degree(&self, node: u64) -> usize {
        self.degrees.get(node) as usize
    }

    /// Byte page and start offset of a node's run, with its degree
    #[inline]
    pub(crate) fn run(&self, node: u64) -> (&[u8], usize, usize) {
        let degree = self.degree(node);
        if degree == 0 {
            return (&[], 0, 0);
        }
        let (page, offset) = unpack(self.addresses.get(node));
        (&self.pages[page], offset, degree)
    }

    /// Cursor positioned at the start of `node`'s targets
    pub fn cursor(&self, node: u64) -> AdjacencyCursor<'_> {
        let mut cursor = AdjacencyCursor::new(self);
        cursor.init(node);
        cursor
    }

    /// Unpositioned cursor, to be moved between nodes with `init`
    pub fn raw_cursor(&self) -> AdjacencyCursor<'_> {
        AdjacencyCursor::new(self)
    }

    /// Bytes held by pages, degrees and addresses
    pub fn size_of_bytes(&self) -> u64 {
        let pages: u64 = self
            .pages
            .iter()
            .map(|page| (page.len() + mem::size_of::<Box<[u8]>>()) as u64)
            .sum();
        pages + self.degrees.size_of_bytes() + self.addresses.size_of_bytes()
    }

    /// Bounds for the memory a list of the given size occupies
    pub fn memory_estimation(node_count: u64, relationship_count: u64) -> MemoryRange {
        let offsets = HugeIntArray::memory_estimation(node_count)
            + HugeLongArray::memory_estimation(node_count);
        let min_pages = relationship_count.div_ceil(PAGE_SIZE_BYTES as u64);
        let max_bytes = relationship_count * MAX_ENCODED_SIZE as u64;
        let max_pages = max_bytes.div_ceil(PAGE_SIZE_BYTES as u64);
        let page_table = mem::size_of::<Box<[u8]>>() as u64;

        MemoryRange::between(
            offsets + relationship_count + min_pages * page_table,
            offsets + max_bytes + max_pages * page_table,
        )
    }
}

/// Appends delta-encoded runs to byte pages
///
/// Each builder worker owns one compressor; its pages are stitched together
/// with the other workers' pages once all runs are written.
#[derive(Debug)]
pub struct AdjacencyCompressor {
    pages: Vec<Box<[u8]>>,
    current: Vec<u8>,
    page_size: usize,
}

impl Default for AdjacencyCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl AdjacencyCompressor {
    pub fn new() -> Self {
        Self::with_page_size(PAGE_SIZE_BYTES)
    }

    pub(crate) fn with_page_size(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            page_size,
        }
    }

    /// Compress one ascending run in place and return its local address and degree.
    ///
    /// `targets` is turned into gaps; entries set to `IGNORE_VALUE` are dropped.
    pub fn compress(&mut self, targets: &mut [u64]) -> (u64, u32) {
        let degree = delta_encode(targets) as u32;
        if degree == 0 {
            return (0, 0);
        }

        // Measure first so the run lands on a single page
        let required = encoded_size_of(targets);
        if required > self.page_size {
            self.seal();
            let mut page = Vec::with_capacity(required);
            encode_values(targets, &mut page);
            self.pages.push(page.into_boxed_slice());
            return (address(self.pages.len() - 1, 0), degree);
        }

        if self.current.len() + required > self.page_size {
            self.seal();
        }
        if self.current.capacity() == 0 {
            self.current.reserve_exact(self.page_size);
        }

        let offset = self.current.len();
        encode_values(targets, &mut self.current);
        (address(self.pages.len(), offset), degree)
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            let page = mem::take(&mut self.current);
            self.pages.push(page.into_boxed_slice());
        }
    }

    /// Close the open page and hand out all pages in address order
    pub fn finish(mut self) -> Vec<Box<[u8]>> {
        self.seal();
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(list: &CompressedAdjacencyList, node: u64) -> Vec<u64> {
        list.cursor(node).collect()
    }

    #[test]
    fn test_round_trip_lists() {
        let lists = vec![vec![1, 2, 5], vec![], vec![0, 127, 128, 16_384], vec![3, 3, 4]];
        let list = CompressedAdjacencyList::from_sorted_lists(lists.clone());

        assert_eq!(list.node_count(), 4);
        assert_eq!(list.relationship_count(), 10);
        for (node, targets) in lists.iter().enumerate() {
            assert_eq!(list.degree(node as u64), targets.len());
            assert_eq!(&decode_all(&list, node as u64), targets);
        }
    }

    #[test]
    fn test_runs_never_straddle_pages() {
        let mut compressor = AdjacencyCompressor::with_page_size(4);
        let mut first = vec![1, 2, 3];
        let mut second = vec![10, 11];
        let mut oversized = vec![100, 200, 300, 400, 500];

        let (a, _) = compressor.compress(&mut first);
        let (b, _) = compressor.compress(&mut second);
        let (c, degree) = compressor.compress(&mut oversized);
        let pages = compressor.finish();

        assert_eq!(unpack(a), (0, 0));
        assert_eq!(unpack(b), (1, 0));
        assert_eq!(unpack(c), (2, 0));
        assert_eq!(degree, 5);
        assert_eq!(pages.len(), 3);
        assert!(pages[2].len() > 4);
    }

    #[test]
    fn test_rebase_moves_page_only() {
        let local = address(1, 17);
        assert_eq!(unpack(rebase(local, 3)), (4, 17));
    }

    #[test]
    fn test_estimation_bounds_actual_size() {
        let lists: Vec<Vec<u64>> = (0..100u64).map(|n| (n..n + 20).collect()).collect();
        let list = CompressedAdjacencyList::from_sorted_lists(lists);
        let estimate = CompressedAdjacencyList::memory_estimation(100, 2000);
        let actual = list.size_of_bytes();
        assert!(estimate.min <= actual && actual <= estimate.max, "{} not in {}", actual, estimate);
    }
}
