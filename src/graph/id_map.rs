//! Mapping between original node ids and dense internal ids

use std::collections::HashMap;
use std::mem;

use dashmap::DashSet;
use rayon::prelude::*;

use crate::memory::HugeLongArray;

/// Bijection between original (sparse) ids and dense ids `0..node_count`.
///
/// Dense ids follow the ascending order of original ids, which keeps the
/// mapping independent of ingestion order.
#[derive(Debug, Clone)]
pub struct IdMap {
    /// Original id per dense id
    original_ids: HugeLongArray,

    /// Original id to dense id; absent for identity maps
    to_dense: Option<HashMap<u64, u64>>,
}

impl IdMap {
    /// Map where original and dense ids coincide
    pub fn identity(node_count: u64) -> Self {
        Self {
            original_ids: HugeLongArray::from_fn(node_count, |id| id),
            to_dense: None,
        }
    }

    /// Build a map from arbitrary, possibly repeated original ids
    pub fn from_original_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.par_sort_unstable();
        ids.dedup();
        Self::from_sorted_unique(ids)
    }

    fn from_sorted_unique(ids: Vec<u64>) -> Self {
        let node_count = ids.len() as u64;
        let mut original_ids = HugeLongArray::new(node_count);
        let mut to_dense = HashMap::with_capacity(ids.len());
        for (dense, &original) in ids.iter().enumerate() {
            original_ids.set(dense as u64, original);
            to_dense.insert(original, dense as u64);
        }
        Self {
            original_ids,
            to_dense: Some(to_dense),
        }
    }

    pub fn node_count(&self) -> u64 {
        self.original_ids.size()
    }

    /// Dense id of an original id, if the node exists
    #[inline]
    pub fn to_mapped(&self, original: u64) -> Option<u64> {
        match &self.to_dense {
            Some(map) => map.get(&original).copied(),
            None if original < self.node_count() => Some(original),
            None => None,
        }
    }

    /// Original id of a dense id
    #[inline]
    pub fn to_original(&self, dense: u64) -> u64 {
        self.original_ids.get(dense)
    }

    pub fn contains(&self, original: u64) -> bool {
        self.to_mapped(original).is_some()
    }

    pub fn size_of_bytes(&self) -> u64 {
        let lookup = self
            .to_dense
            .as_ref()
            .map(|map| (map.capacity() * 2 * mem::size_of::<u64>()) as u64)
            .unwrap_or(0);
        self.original_ids.size_of_bytes() + lookup
    }

    pub fn memory_estimation(node_count: u64) -> u64 {
        // Hash lookup: key and value per node, sized for the default load factor
        HugeLongArray::memory_estimation(node_count) + node_count * 2 * 8 * 8 / 7
    }
}

/// Concurrently collects original ids before they are frozen into an [`IdMap`]
#[derive(Debug, Default)]
pub struct IdMapBuilder {
    ids: DashSet<u64>,
}

impl IdMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: DashSet::with_capacity(capacity),
        }
    }

    /// Register an original id; safe to call from many threads
    pub fn add_node(&self, original: u64) {
        self.ids.insert(original);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Freeze the collected ids into a dense mapping
    pub fn build(self) -> IdMap {
        let mut ids: Vec<u64> = self.ids.into_iter().collect();
        ids.par_sort_unstable();
        log::debug!("Built id map with {} nodes", ids.len());
        IdMap::from_sorted_unique(ids)
    }
}
