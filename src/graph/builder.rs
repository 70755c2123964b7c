//! Graph construction module
//!
//! Relationships arrive through any number of concurrent batches. Each batch
//! buffers locally and hands its relationships to the bucket of the partition
//! owning the source node. Building sorts, aggregates and compresses every
//! bucket on its own worker and then stitches the per-partition pages into
//! one adjacency list.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::graph::compressed::{rebase, AdjacencyCompressor, CompressedAdjacencyList};
use crate::graph::id_map::IdMap;
use crate::graph::{Aggregation, Graph, Orientation, RelationshipProperties, Relationships};
use crate::memory::{AllocationTracker, HugeDoubleArray, HugeIntArray, HugeLongArray};
use crate::parallel::{partition_index, range_partition, Partition, ProgressTracker, WorkerPool};

/// Settings for loading one relationship type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipsConfig {
    pub orientation: Orientation,
    pub aggregation: Aggregation,

    /// Keep relationships whose source equals their target
    pub allow_self_loops: bool,

    /// Store a weight next to every relationship
    pub weighted: bool,

    /// Weight used when a relationship is added without one
    pub default_weight: f64,

    /// Relationships a batch buffers before handing them to the buckets
    pub batch_size: usize,

    /// Workers compressing partitions during `build`
    pub concurrency: usize,
}

impl Default for RelationshipsConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Natural,
            aggregation: Aggregation::None,
            allow_self_loops: true,
            weighted: false,
            default_weight: 1.0,
            batch_size: 10_000,
            concurrency: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RawRelationship {
    source: u64,
    target: u64,
    weight: f64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking producer leaves a consistent Vec behind
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects the relationships of one type for the nodes of an [`IdMap`]
#[derive(Debug)]
pub struct RelationshipsBuilder<'a> {
    id_map: &'a IdMap,
    config: RelationshipsConfig,
    partitions: Vec<Partition>,
    buckets: Vec<Mutex<Vec<RawRelationship>>>,
}

impl<'a> RelationshipsBuilder<'a> {
    pub fn new(id_map: &'a IdMap, config: RelationshipsConfig) -> Self {
        let partitions = range_partition(id_map.node_count(), config.concurrency.max(1));
        let buckets = partitions.iter().map(|_| Mutex::new(Vec::new())).collect();
        Self {
            id_map,
            config,
            partitions,
            buckets,
        }
    }

    pub fn config(&self) -> &RelationshipsConfig {
        &self.config
    }

    /// Buffered producer handle; create one per producing thread
    pub fn batch(&self) -> RelationshipBatch<'_, 'a> {
        RelationshipBatch {
            builder: self,
            buffers: vec![Vec::new(); self.partitions.len()],
            buffered: 0,
        }
    }

    /// Add a single relationship between original ids with the default weight
    pub fn add(&self, source: u64, target: u64) -> Result<()> {
        self.add_weighted(source, target, self.config.default_weight)
    }

    /// Add a single relationship between original ids
    pub fn add_weighted(&self, source: u64, target: u64, weight: f64) -> Result<()> {
        let (source, target) = self.map_pair(source, target)?;
        self.fan_out(source, target, weight, |relationship| {
            let index = partition_index(&self.partitions, relationship.source);
            lock(&self.buckets[index]).push(relationship);
        });
        Ok(())
    }

    fn map_pair(&self, source: u64, target: u64) -> Result<(u64, u64)> {
        let source = self
            .id_map
            .to_mapped(source)
            .ok_or(GraphError::UnknownNode(source))?;
        let target = self
            .id_map
            .to_mapped(target)
            .ok_or(GraphError::UnknownNode(target))?;
        Ok((source, target))
    }

    fn check_dense(&self, node: u64) -> Result<()> {
        if node < self.id_map.node_count() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(node))
        }
    }

    /// Apply orientation and the self-loop rule to one dense relationship
    #[inline]
    fn fan_out(&self, source: u64, target: u64, weight: f64, mut push: impl FnMut(RawRelationship)) {
        if source == target && !self.config.allow_self_loops {
            return;
        }
        match self.config.orientation {
            Orientation::Natural => push(RawRelationship { source, target, weight }),
            Orientation::Reverse => push(RawRelationship {
                source: target,
                target: source,
                weight,
            }),
            Orientation::Undirected => {
                push(RawRelationship { source, target, weight });
                if source != target {
                    push(RawRelationship {
                        source: target,
                        target: source,
                        weight,
                    });
                }
            }
        }
    }

    /// Sort, aggregate and compress all buckets into the final adjacency
    pub fn build(self) -> Result<Relationships> {
        let RelationshipsBuilder {
            id_map,
            config,
            partitions,
            buckets,
        } = self;

        let node_count = id_map.node_count();
        let with_properties = config.weighted || config.aggregation == Aggregation::Count;
        let pool = WorkerPool::new(config.concurrency)?;
        let progress = ProgressTracker::new("Relationship compression", node_count);
        progress.begin();

        let chunks = pool.run(partitions.len(), |index| {
            let relationships = mem::take(&mut *lock(&buckets[index]));
            let chunk = compress_partition(relationships, &partitions[index], &config, id_map)?;
            progress.log_progress(partitions[index].node_count);
            Ok(chunk)
        })?;

        // Stitch per-partition pages behind each other
        let value_count: u64 = chunks.iter().map(|chunk| chunk.weights.len() as u64).sum();
        let mut degrees = HugeIntArray::new(node_count);
        let mut addresses = HugeLongArray::new(node_count);
        let mut offsets = HugeLongArray::new(if with_properties { node_count } else { 0 });
        let mut values = HugeDoubleArray::new(if with_properties { value_count } else { 0 });
        let mut pages = Vec::new();
        let mut value_offset = 0u64;
        let mut is_multi_graph = false;

        for (partition, chunk) in partitions.iter().zip(chunks) {
            let page_base = pages.len();
            for (local, node) in partition.nodes().enumerate() {
                let degree = chunk.degrees[local];
                degrees.set(node, degree);
                addresses.set(node, rebase(chunk.addresses[local], page_base));
                if with_properties {
                    offsets.set(node, value_offset);
                    value_offset += u64::from(degree);
                }
            }
            if with_properties {
                let start = value_offset - chunk.weights.len() as u64;
                for (index, weight) in chunk.weights.into_iter().enumerate() {
                    values.set(start + index as u64, weight);
                }
            }
            pages.extend(chunk.pages);
            is_multi_graph |= chunk.is_multi_graph;
        }

        let adjacency = CompressedAdjacencyList::new(pages, degrees, addresses);
        progress.end();
        log::info!(
            "Built {} relationships for {} nodes ({:?}, {:?})",
            adjacency.relationship_count(),
            node_count,
            config.orientation,
            config.aggregation
        );

        Ok(Relationships {
            adjacency,
            properties: with_properties.then(|| RelationshipProperties::new(values, offsets)),
            orientation: config.orientation,
            is_multi_graph,
        })
    }
}

/// Buffered relationship producer; flushes when full and when dropped
#[derive(Debug)]
pub struct RelationshipBatch<'b, 'a> {
    builder: &'b RelationshipsBuilder<'a>,
    buffers: Vec<Vec<RawRelationship>>,
    buffered: usize,
}

impl RelationshipBatch<'_, '_> {
    /// Add a relationship between original ids with the default weight
    pub fn add(&mut self, source: u64, target: u64) -> Result<()> {
        self.add_weighted(source, target, self.builder.config.default_weight)
    }

    /// Add a relationship between original ids
    pub fn add_weighted(&mut self, source: u64, target: u64, weight: f64) -> Result<()> {
        let (source, target) = self.builder.map_pair(source, target)?;
        self.push(source, target, weight);
        Ok(())
    }

    /// Add a relationship between already mapped node ids
    pub fn add_dense(&mut self, source: u64, target: u64, weight: f64) -> Result<()> {
        self.builder.check_dense(source)?;
        self.builder.check_dense(target)?;
        self.push(source, target, weight);
        Ok(())
    }

    fn push(&mut self, source: u64, target: u64, weight: f64) {
        let builder = self.builder;
        let buffers = &mut self.buffers;
        let mut added = 0;
        builder.fan_out(source, target, weight, |relationship| {
            let index = partition_index(&builder.partitions, relationship.source);
            buffers[index].push(relationship);
            added += 1;
        });
        self.buffered += added;
        if self.buffered >= builder.config.batch_size.max(1) {
            self.flush();
        }
    }

    /// Hand every buffered relationship to its bucket
    pub fn flush(&mut self) {
        if self.buffered == 0 {
            return;
        }
        for (index, buffer) in self.buffers.iter_mut().enumerate() {
            if !buffer.is_empty() {
                lock(&self.builder.buckets[index]).append(buffer);
            }
        }
        self.buffered = 0;
    }
}

impl Drop for RelationshipBatch<'_, '_> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Compressed output of one partition, with partition-local page addresses
struct CompressedPartition {
    pages: Vec<Box<[u8]>>,
    degrees: Vec<u32>,
    addresses: Vec<u64>,
    weights: Vec<f64>,
    is_multi_graph: bool,
}

fn compress_partition(
    mut relationships: Vec<RawRelationship>,
    partition: &Partition,
    config: &RelationshipsConfig,
    id_map: &IdMap,
) -> Result<CompressedPartition> {
    // Stable, so SINGLE keeps the earliest relationship of a group
    relationships.sort_by_key(|relationship| (relationship.source, relationship.target));

    let capacity = partition.node_count as usize;
    let mut compressor = AdjacencyCompressor::new();
    let mut degrees = Vec::with_capacity(capacity);
    let mut addresses = Vec::with_capacity(capacity);
    let mut weights = Vec::new();
    let mut is_multi_graph = false;

    let mut targets = Vec::new();
    let mut node_weights = Vec::new();
    let mut next = 0;

    for node in partition.nodes() {
        targets.clear();
        node_weights.clear();

        while next < relationships.len() && relationships[next].source == node {
            let RawRelationship { target, weight, .. } = relationships[next];
            next += 1;

            if targets.last() != Some(&target) {
                targets.push(target);
                node_weights.push(config.aggregation.initial(weight));
                continue;
            }
            match config.aggregation {
                Aggregation::None => {
                    is_multi_graph = true;
                    targets.push(target);
                    node_weights.push(weight);
                }
                Aggregation::Reject => {
                    return Err(GraphError::DuplicateRelationship(
                        id_map.to_original(node),
                        id_map.to_original(target),
                    ));
                }
                aggregation => {
                    if let Some(current) = node_weights.last_mut() {
                        *current = aggregation.combine(*current, weight);
                    }
                }
            }
        }

        let (address, degree) = compressor.compress(&mut targets);
        degrees.push(degree);
        addresses.push(address);
        weights.extend_from_slice(&node_weights);
    }

    Ok(CompressedPartition {
        pages: compressor.finish(),
        degrees,
        addresses,
        weights,
        is_multi_graph,
    })
}

/// Assembles an [`IdMap`], relationship types and node properties into a [`Graph`]
#[derive(Debug)]
pub struct GraphBuilder {
    id_map: IdMap,
    relationship_types: Vec<(String, Relationships)>,
    node_properties: HashMap<String, HugeDoubleArray>,
    tracker: AllocationTracker,
}

impl GraphBuilder {
    pub fn new(id_map: IdMap) -> Self {
        Self {
            id_map,
            relationship_types: Vec::new(),
            node_properties: HashMap::new(),
            tracker: AllocationTracker::new(),
        }
    }

    /// Account the built graph's memory against `tracker`
    pub fn with_tracker(mut self, tracker: AllocationTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn id_map(&self) -> &IdMap {
        &self.id_map
    }

    /// Start collecting a relationship type over this builder's nodes
    pub fn relationships(&self, config: RelationshipsConfig) -> RelationshipsBuilder<'_> {
        RelationshipsBuilder::new(&self.id_map, config)
    }

    pub fn add_relationship_type(&mut self, name: impl Into<String>, relationships: Relationships) {
        self.relationship_types.push((name.into(), relationships));
    }

    /// Attach one value per node under `name`
    pub fn add_node_property(&mut self, name: impl Into<String>, values: HugeDoubleArray) -> Result<()> {
        let name = name.into();
        if values.size() != self.id_map.node_count() {
            return Err(GraphError::Configuration(format!(
                "node property '{}' has {} values for {} nodes",
                name,
                values.size(),
                self.id_map.node_count()
            )));
        }
        self.node_properties.insert(name, values);
        Ok(())
    }

    pub fn build(self) -> Result<Graph> {
        let node_count = self.id_map.node_count();
        for (index, (name, relationships)) in self.relationship_types.iter().enumerate() {
            if relationships.adjacency.node_count() != node_count {
                return Err(GraphError::Configuration(format!(
                    "relationship type '{}' covers {} nodes, graph has {}",
                    name,
                    relationships.adjacency.node_count(),
                    node_count
                )));
            }
            if self.relationship_types[..index].iter().any(|(other, _)| other == name) {
                return Err(GraphError::Configuration(format!(
                    "relationship type '{}' added twice",
                    name
                )));
            }
        }

        let graph = Graph::new(
            self.id_map,
            self.relationship_types,
            self.node_properties,
            self.tracker,
        );
        log::info!(
            "Graph ready: {} nodes, {} relationships, {} bytes",
            graph.node_count(),
            graph.relationship_count(),
            graph.size_of_bytes()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(config: RelationshipsConfig, node_count: u64, edges: &[(u64, u64, f64)]) -> Result<Relationships> {
        let id_map = IdMap::identity(node_count);
        let builder = RelationshipsBuilder::new(&id_map, config);
        let mut batch = builder.batch();
        for &(source, target, weight) in edges {
            batch.add_weighted(source, target, weight)?;
        }
        drop(batch);
        builder.build()
    }

    fn targets(relationships: &Relationships, node: u64) -> Vec<u64> {
        relationships.adjacency.cursor(node).collect()
    }

    fn weights(relationships: &Relationships, node: u64) -> Vec<f64> {
        let properties = relationships.properties.as_ref().unwrap();
        (0..relationships.adjacency.degree(node))
            .map(|index| properties.weight(node, index))
            .collect()
    }

    fn aggregated(aggregation: Aggregation) -> RelationshipsConfig {
        RelationshipsConfig {
            aggregation,
            weighted: true,
            concurrency: 2,
            ..RelationshipsConfig::default()
        }
    }

    const PARALLEL: [(u64, u64, f64); 4] = [(0, 1, 2.0), (0, 1, 5.0), (0, 2, 1.0), (0, 1, 3.0)];

    #[test]
    fn test_aggregations_combine_weights() {
        let cases = [
            (Aggregation::Single, 2.0),
            (Aggregation::Sum, 10.0),
            (Aggregation::Min, 2.0),
            (Aggregation::Max, 5.0),
            (Aggregation::Count, 3.0),
        ];
        for (aggregation, expected) in cases {
            let relationships = build(aggregated(aggregation), 3, &PARALLEL).unwrap();
            assert_eq!(targets(&relationships, 0), vec![1, 2], "{:?}", aggregation);
            assert_eq!(weights(&relationships, 0)[0], expected, "{:?}", aggregation);
            assert!(!relationships.is_multi_graph);
        }
    }

    #[test]
    fn test_none_keeps_parallel_relationships() {
        let relationships = build(aggregated(Aggregation::None), 3, &PARALLEL).unwrap();
        assert_eq!(targets(&relationships, 0), vec![1, 1, 1, 2]);
        assert_eq!(weights(&relationships, 0), vec![2.0, 5.0, 3.0, 1.0]);
        assert!(relationships.is_multi_graph);
    }

    #[test]
    fn test_reject_reports_original_ids() {
        let id_map = IdMap::from_original_ids([100, 200]);
        let builder = RelationshipsBuilder::new(
            &id_map,
            RelationshipsConfig {
                aggregation: Aggregation::Reject,
                ..RelationshipsConfig::default()
            },
        );
        builder.add(100, 200).unwrap();
        builder.add(100, 200).unwrap();
        assert!(matches!(
            builder.build(),
            Err(GraphError::DuplicateRelationship(100, 200))
        ));
    }

    #[test]
    fn test_orientation_and_self_loops() {
        let edges = [(0, 1, 1.0), (2, 2, 1.0)];

        let reverse = RelationshipsConfig {
            orientation: Orientation::Reverse,
            ..RelationshipsConfig::default()
        };
        let relationships = build(reverse, 3, &edges).unwrap();
        assert_eq!(targets(&relationships, 1), vec![0]);
        assert!(targets(&relationships, 0).is_empty());

        let undirected = RelationshipsConfig {
            orientation: Orientation::Undirected,
            ..RelationshipsConfig::default()
        };
        let relationships = build(undirected, 3, &edges).unwrap();
        assert_eq!(targets(&relationships, 0), vec![1]);
        assert_eq!(targets(&relationships, 1), vec![0]);
        assert_eq!(targets(&relationships, 2), vec![2]);

        let no_loops = RelationshipsConfig {
            allow_self_loops: false,
            ..RelationshipsConfig::default()
        };
        let relationships = build(no_loops, 3, &edges).unwrap();
        assert!(targets(&relationships, 2).is_empty());
        assert_eq!(relationships.adjacency.relationship_count(), 1);
    }

    #[test]
    fn test_unknown_nodes_are_rejected() {
        let id_map = IdMap::from_original_ids([1, 2]);
        let builder = RelationshipsBuilder::new(&id_map, RelationshipsConfig::default());
        assert!(matches!(builder.add(1, 3), Err(GraphError::UnknownNode(3))));
        let mut batch = builder.batch();
        assert!(matches!(batch.add_dense(0, 2, 1.0), Err(GraphError::UnknownNode(2))));
    }

    #[test]
    fn test_concurrent_batches() {
        let node_count = 500u64;
        let id_map = IdMap::identity(node_count);
        let builder = RelationshipsBuilder::new(
            &id_map,
            RelationshipsConfig {
                aggregation: Aggregation::Single,
                batch_size: 64,
                concurrency: 4,
                ..RelationshipsConfig::default()
            },
        );

        std::thread::scope(|scope| {
            for producer in 0..4u64 {
                let builder = &builder;
                scope.spawn(move || {
                    let mut batch = builder.batch();
                    for source in (producer..node_count).step_by(4) {
                        for offset in 1..=10 {
                            batch.add(source, (source + offset * 7) % node_count).unwrap();
                        }
                    }
                });
            }
        });

        let relationships = builder.build().unwrap();
        assert_eq!(relationships.adjacency.relationship_count(), node_count * 10);
        for node in 0..node_count {
            let mut expected: Vec<u64> = (1..=10).map(|offset| (node + offset * 7) % node_count).collect();
            expected.sort_unstable();
            assert_eq!(targets(&relationships, node), expected);
        }
        assert!(relationships.properties.is_none());
    }

    #[test]
    fn test_node_property_size_must_match() {
        let mut builder = GraphBuilder::new(IdMap::identity(3));
        assert!(builder.add_node_property("seed", HugeDoubleArray::new(3)).is_ok());
        assert!(matches!(
            builder.add_node_property("bad", HugeDoubleArray::new(2)),
            Err(GraphError::Configuration(_))
        ));
        let graph = builder.build().unwrap();
        assert_eq!(graph.node_property("seed").map(|values| values.size()), Some(3));
    }

    #[test]
    fn test_duplicate_type_names_rejected() {
        let mut builder = GraphBuilder::new(IdMap::identity(2));
        for _ in 0..2 {
            let relationships = builder.relationships(RelationshipsConfig::default()).build().unwrap();
            builder.add_relationship_type("REL", relationships);
        }
        assert!(matches!(builder.build(), Err(GraphError::Configuration(_))));
    }
}
