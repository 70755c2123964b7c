//! Splitting the node id space into contiguous partitions

use std::ops::Range;

use serde::Serialize;

/// Upper bound on the nodes of one partition, keeping per-partition
/// offsets within 32-bit arithmetic
pub const MAX_PARTITION_SIZE: u64 = 1 << 30;

/// Contiguous slice of dense node ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub start_node: u64,
    pub node_count: u64,
}

impl Partition {
    pub fn new(start_node: u64, node_count: u64) -> Self {
        Self {
            start_node,
            node_count,
        }
    }

    /// First node after this partition
    pub fn end_node(&self) -> u64 {
        self.start_node + self.node_count
    }

    /// Nodes of the partition in ascending order
    pub fn nodes(&self) -> Range<u64> {
        self.start_node..self.end_node()
    }

    pub fn contains(&self, node: u64) -> bool {
        self.nodes().contains(&node)
    }
}

/// Near-equal contiguous partitions; the last one takes whatever is left
pub fn range_partition(node_count: u64, concurrency: usize) -> Vec<Partition> {
    range_partition_bounded(node_count, concurrency, MAX_PARTITION_SIZE)
}

pub(crate) fn range_partition_bounded(node_count: u64, concurrency: usize, max_size: u64) -> Vec<Partition> {
    if node_count == 0 {
        return Vec::new();
    }

    let partition_count = (concurrency.max(1) as u64)
        .min(node_count)
        .max(node_count.div_ceil(max_size.max(1)));
    let batch_size = node_count.div_ceil(partition_count);

    let mut partitions = Vec::with_capacity(partition_count as usize);
    let mut start_node = 0;
    while start_node < node_count {
        let count = batch_size.min(node_count - start_node);
        partitions.push(Partition::new(start_node, count));
        start_node += count;
    }
    partitions
}

/// Index of the partition holding `node` in a sequence built by [`range_partition`]
#[inline]
pub fn partition_index(partitions: &[Partition], node: u64) -> usize {
    let batch_size = partitions[0].node_count;
    ((node / batch_size) as usize).min(partitions.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use proptest::prelude::*;

    fn assert_tiles(partitions: &[Partition], node_count: u64, max_size: u64) {
        assert_eq!(partitions.iter().map(|p| p.node_count).sum::<u64>(), node_count);
        if let Some(first) = partitions.first() {
            assert_eq!(first.start_node, 0);
        }
        for (left, right) in partitions.iter().tuple_windows() {
            assert_eq!(left.end_node(), right.start_node);
        }
        assert!(partitions.iter().all(|p| p.node_count > 0 && p.node_count <= max_size));
    }

    #[test]
    fn test_last_partition_takes_leftover() {
        let partitions = range_partition(10, 3);
        assert_eq!(
            partitions,
            vec![Partition::new(0, 4), Partition::new(4, 4), Partition::new(8, 2)]
        );
    }

    #[test]
    fn test_fewer_nodes_than_workers() {
        let partitions = range_partition(2, 8);
        assert_eq!(partitions, vec![Partition::new(0, 1), Partition::new(1, 1)]);
        assert!(range_partition(0, 8).is_empty());
    }

    #[test]
    fn test_bound_forces_more_partitions() {
        let partitions = range_partition_bounded(1000, 2, 64);
        assert!(partitions.len() > 2);
        assert_tiles(&partitions, 1000, 64);
    }

    #[test]
    fn test_partition_index() {
        let partitions = range_partition(10, 3);
        assert_eq!(partition_index(&partitions, 0), 0);
        assert_eq!(partition_index(&partitions, 5), 1);
        assert_eq!(partition_index(&partitions, 9), 2);
        for node in 0..10 {
            assert!(partitions[partition_index(&partitions, node)].contains(node));
        }
    }

    proptest! {
        #[test]
        fn prop_partitions_tile_id_space(node_count in 0u64..100_000, concurrency in 1usize..64, max_size in 1u64..5_000) {
            let partitions = range_partition_bounded(node_count, concurrency, max_size);
            assert_tiles(&partitions, node_count, max_size);
            for node in (0..node_count).step_by(97) {
                prop_assert!(partitions[partition_index(&partitions, node)].contains(node));
            }
        }
    }
}
