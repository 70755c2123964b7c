//! Graph representation, construction and traversal

pub mod builder;
pub mod compressed;
pub mod cursor;
pub mod id_map;
pub mod intersect;
pub mod varint;

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::memory::{AllocationTracker, GraphDimensions, HugeDoubleArray, HugeLongArray, MemoryRange};

pub use builder::{GraphBuilder, RelationshipBatch, RelationshipsBuilder, RelationshipsConfig};
pub use compressed::{AdjacencyCompressor, CompressedAdjacencyList};
pub use cursor::{
    AdjacencyCursor, CompositeAdjacencyCursor, GraphCursor, NeighborCursor, NOT_FOUND,
};
pub use id_map::{IdMap, IdMapBuilder};
pub use intersect::RelationshipIntersect;

/// Direction in which relationships are exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Orientation {
    /// Stored as `source -> target`
    #[default]
    Natural,
    /// Stored as `target -> source`
    Reverse,
    /// Stored in both directions
    Undirected,
}

/// Rule combining parallel relationships between the same node pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    /// Keep every parallel relationship; the topology becomes a multigraph
    #[default]
    None,
    /// Fail the build on the first parallel relationship
    Reject,
    /// Keep the first relationship and its weight
    Single,
    Sum,
    Min,
    Max,
    /// Keep one relationship weighted by the number of parallel ones
    Count,
}

impl Aggregation {
    /// Weight of the first relationship of a group
    #[inline]
    pub(crate) fn initial(self, weight: f64) -> f64 {
        match self {
            Aggregation::Count => 1.0,
            _ => weight,
        }
    }

    /// Fold another parallel relationship's weight into the group
    #[inline]
    pub(crate) fn combine(self, current: f64, weight: f64) -> f64 {
        match self {
            Aggregation::Sum => current + weight,
            Aggregation::Min => current.min(weight),
            Aggregation::Max => current.max(weight),
            Aggregation::Count => current + 1.0,
            Aggregation::None | Aggregation::Reject | Aggregation::Single => current,
        }
    }
}

/// Relationship weights aligned 1:1 with encoded targets
#[derive(Debug)]
pub struct RelationshipProperties {
    /// Weight per encoded relationship, in node then target order
    values: HugeDoubleArray,

    /// Index of each node's first weight
    offsets: HugeLongArray,
}

impl RelationshipProperties {
    pub(crate) fn new(values: HugeDoubleArray, offsets: HugeLongArray) -> Self {
        Self { values, offsets }
    }

    /// Weight of the `index`-th relationship of `node`
    #[inline]
    pub fn weight(&self, node: u64, index: usize) -> f64 {
        self.values.get(self.offsets.get(node) + index as u64)
    }

    pub fn size_of_bytes(&self) -> u64 {
        self.values.size_of_bytes() + self.offsets.size_of_bytes()
    }
}

/// Topology and optional weights of one relationship type
#[derive(Debug)]
pub struct Relationships {
    pub adjacency: CompressedAdjacencyList,
    pub properties: Option<RelationshipProperties>,
    pub orientation: Orientation,
    pub is_multi_graph: bool,
}

impl Relationships {
    pub fn size_of_bytes(&self) -> u64 {
        self.adjacency.size_of_bytes()
            + self.properties.as_ref().map_or(0, |p| p.size_of_bytes())
    }

    /// Bounds for the memory of a relationship type with the given size
    pub fn memory_estimation(dimensions: &GraphDimensions, weighted: bool) -> MemoryRange {
        let adjacency = CompressedAdjacencyList::memory_estimation(
            dimensions.node_count,
            dimensions.relationship_count,
        );
        if weighted {
            adjacency
                + MemoryRange::of(
                    HugeDoubleArray::memory_estimation(dimensions.relationship_count)
                        + HugeLongArray::memory_estimation(dimensions.node_count),
                )
        } else {
            adjacency
        }
    }
}

#[derive(Debug)]
struct GraphStore {
    id_map: IdMap,
    relationship_types: Vec<(String, Relationships)>,
    node_properties: HashMap<String, HugeDoubleArray>,
    is_multi_graph: bool,
    size_in_bytes: u64,
    tracker: AllocationTracker,
}

/// Immutable, shareable graph handle.
///
/// Cloning the handle (or calling [`Graph::concurrent_copy`]) shares the
/// compressed bytes; every traversal allocates its own cursor state, so
/// copies can be used from different threads at the same time.
#[derive(Debug, Clone)]
pub struct Graph {
    store: Arc<GraphStore>,
}

impl Graph {
    pub(crate) fn new(
        id_map: IdMap,
        relationship_types: Vec<(String, Relationships)>,
        node_properties: HashMap<String, HugeDoubleArray>,
        tracker: AllocationTracker,
    ) -> Self {
        let size_in_bytes = id_map.size_of_bytes()
            + relationship_types
                .iter()
                .map(|(_, relationships)| relationships.size_of_bytes())
                .sum::<u64>()
            + node_properties
                .values()
                .map(|values| values.size_of_bytes())
                .sum::<u64>();
        tracker.add(size_in_bytes);

        let mut store = GraphStore {
            id_map,
            relationship_types,
            node_properties,
            is_multi_graph: false,
            size_in_bytes,
            tracker,
        };
        store.is_multi_graph = detect_multi_graph(&store);

        Self {
            store: Arc::new(store),
        }
    }

    /// Build a graph whose nodes are exactly the endpoints of `edges`
    pub fn from_edges(edges: &[(u64, u64)], config: RelationshipsConfig) -> Result<Graph> {
        let weighted: Vec<(u64, u64, f64)> = edges
            .iter()
            .map(|&(source, target)| (source, target, config.default_weight))
            .collect();
        Self::from_weighted_edges(&weighted, config)
    }

    /// Build a graph whose nodes are exactly the endpoints of `edges`, keeping weights
    pub fn from_weighted_edges(edges: &[(u64, u64, f64)], config: RelationshipsConfig) -> Result<Graph> {
        let id_map = IdMap::from_original_ids(
            edges
                .iter()
                .flat_map(|&(source, target, _)| [source, target]),
        );
        let mut builder = GraphBuilder::new(id_map);
        let relationships = {
            let relationships = builder.relationships(config);
            let mut batch = relationships.batch();
            for &(source, target, weight) in edges {
                batch.add_weighted(source, target, weight)?;
            }
            batch.flush();
            drop(batch);
            relationships.build()?
        };
        builder.add_relationship_type("REL", relationships);
        builder.build()
    }

    /// Handle sharing all bytes with `self`; cursor state is never shared
    pub fn concurrent_copy(&self) -> Graph {
        self.clone()
    }

    pub fn node_count(&self) -> u64 {
        self.store.id_map.node_count()
    }

    /// Encoded relationships over all types; undirected edges count once per direction
    pub fn relationship_count(&self) -> u64 {
        self.store
            .relationship_types
            .iter()
            .map(|(_, relationships)| relationships.adjacency.relationship_count())
            .sum()
    }

    pub fn dimensions(&self) -> GraphDimensions {
        GraphDimensions::new(self.node_count(), self.relationship_count())
    }

    pub fn id_map(&self) -> &IdMap {
        &self.store.id_map
    }

    #[inline]
    pub fn to_original(&self, node: u64) -> u64 {
        self.store.id_map.to_original(node)
    }

    #[inline]
    pub fn to_mapped(&self, original: u64) -> Option<u64> {
        self.store.id_map.to_mapped(original)
    }

    pub fn relationship_types(&self) -> impl Iterator<Item = &str> {
        self.store
            .relationship_types
            .iter()
            .map(|(name, _)| name.as_str())
    }

    /// True when every relationship type is stored in both directions
    pub fn is_undirected(&self) -> bool {
        !self.store.relationship_types.is_empty()
            && self
                .store
                .relationship_types
                .iter()
                .all(|(_, relationships)| relationships.orientation == Orientation::Undirected)
    }

    /// True when some node has parallel relationships to the same target
    pub fn is_multi_graph(&self) -> bool {
        self.store.is_multi_graph
    }

    /// True when every relationship type carries weights
    pub fn has_relationship_property(&self) -> bool {
        !self.store.relationship_types.is_empty()
            && self
                .store
                .relationship_types
                .iter()
                .all(|(_, relationships)| relationships.properties.is_some())
    }

    #[inline]
    pub fn degree(&self, node: u64) -> usize {
        self.store
            .relationship_types
            .iter()
            .map(|(_, relationships)| relationships.adjacency.degree(node))
            .sum()
    }

    /// Largest degree over all nodes
    pub fn max_degree(&self) -> usize {
        (0..self.node_count())
            .into_par_iter()
            .map(|node| self.degree(node))
            .max()
            .unwrap_or(0)
    }

    pub fn node_property(&self, name: &str) -> Option<&HugeDoubleArray> {
        self.store.node_properties.get(name)
    }

    /// Sorted cursor over all targets of `node`
    pub fn cursor(&self, node: u64) -> GraphCursor<'_> {
        let mut cursor = self.raw_cursor();
        cursor.init(node);
        cursor
    }

    /// Unpositioned cursor; bind it with `init`
    pub fn raw_cursor(&self) -> GraphCursor<'_> {
        match self.store.relationship_types.as_slice() {
            [(_, relationships)] => GraphCursor::Single(relationships.adjacency.raw_cursor()),
            types => GraphCursor::Composite(CompositeAdjacencyCursor::new(
                types
                    .iter()
                    .map(|(_, relationships)| relationships.adjacency.raw_cursor())
                    .collect(),
            )),
        }
    }

    /// Call `consumer(node, target)` for each relationship of `node` in target order.
    ///
    /// Iteration stops early when the consumer returns `false`.
    pub fn for_each_relationship(&self, node: u64, mut consumer: impl FnMut(u64, u64) -> bool) {
        let mut cursor = self.cursor(node);
        loop {
            let target = cursor.next_v();
            if target == NOT_FOUND || !consumer(node, target) {
                return;
            }
        }
    }

    /// Call `consumer(node, target, weight)` for each relationship of `node`.
    ///
    /// Relationships are visited type by type; types without weights report `fallback`.
    pub fn for_each_relationship_weighted(
        &self,
        node: u64,
        fallback: f64,
        mut consumer: impl FnMut(u64, u64, f64) -> bool,
    ) {
        for (_, relationships) in &self.store.relationship_types {
            let cursor = relationships.adjacency.cursor(node);
            for (index, target) in cursor.enumerate() {
                let weight = relationships
                    .properties
                    .as_ref()
                    .map_or(fallback, |properties| properties.weight(node, index));
                if !consumer(node, target, weight) {
                    return;
                }
            }
        }
    }

    /// Whether a relationship `source -> target` exists
    pub fn exists(&self, source: u64, target: u64) -> bool {
        self.cursor(source).advance(target) == target
    }

    /// Triangle enumeration helper skipping nodes with degree above `max_degree`
    pub fn intersection(&self, max_degree: u64) -> Result<RelationshipIntersect<'_>> {
        if !self.is_undirected() {
            return Err(GraphError::UnsupportedGraph(
                "relationship intersection requires an undirected graph".to_string(),
            ));
        }
        if self.is_multi_graph() {
            return Err(GraphError::UnsupportedGraph(
                "relationship intersection requires a graph without parallel relationships; \
                 use an aggregation other than NONE"
                    .to_string(),
            ));
        }
        Ok(RelationshipIntersect::new(self, max_degree))
    }

    /// Bytes held by the topology, weights, node properties and id map
    pub fn size_of_bytes(&self) -> u64 {
        self.store.size_in_bytes
    }

    /// Bounds for the memory of a graph with the given size
    pub fn memory_estimation(dimensions: &GraphDimensions, weighted: bool) -> MemoryRange {
        MemoryRange::of(IdMap::memory_estimation(dimensions.node_count))
            + Relationships::memory_estimation(dimensions, weighted)
    }

    /// Drop this handle and, if it was the last one, all large arrays.
    ///
    /// Returns the number of bytes released.
    pub fn release(self) -> u64 {
        match Arc::try_unwrap(self.store) {
            Ok(store) => {
                store.tracker.remove(store.size_in_bytes);
                log::debug!("Released graph holding {} bytes", store.size_in_bytes);
                store.size_in_bytes
            }
            Err(_) => {
                log::debug!("Graph still shared, release deferred to the last handle");
                0
            }
        }
    }
}

/// Parallel relationships exist in a type, or arise from merging several types
fn detect_multi_graph(store: &GraphStore) -> bool {
    if store
        .relationship_types
        .iter()
        .any(|(_, relationships)| relationships.is_multi_graph)
    {
        return true;
    }
    if store.relationship_types.len() < 2 {
        return false;
    }

    let cursors: Vec<_> = store
        .relationship_types
        .iter()
        .map(|(_, relationships)| &relationships.adjacency)
        .collect();
    (0..store.id_map.node_count()).into_par_iter().any(|node| {
        let mut cursor =
            CompositeAdjacencyCursor::new(cursors.iter().map(|list| list.cursor(node)).collect());
        let mut previous = NOT_FOUND;
        loop {
            let target = cursor.next_v();
            if target == NOT_FOUND {
                return false;
            }
            if target == previous {
                return true;
            }
            previous = target;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn undirected() -> RelationshipsConfig {
        RelationshipsConfig {
            orientation: Orientation::Undirected,
            aggregation: Aggregation::Single,
            ..RelationshipsConfig::default()
        }
    }

    #[test]
    fn test_undirected_exposes_both_endpoints() {
        let graph = Graph::from_edges(&[(10, 20), (20, 30)], undirected()).unwrap();
        let b = graph.to_mapped(20).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.relationship_count(), 4);
        assert_eq!(graph.degree(b), 2);
        assert!(graph.exists(0, 1));
        assert!(graph.exists(1, 0));
        assert!(!graph.exists(0, 2));
        assert!(graph.is_undirected());
        assert!(!graph.is_multi_graph());
    }

    #[test]
    fn test_for_each_relationship_stops_early() {
        let graph = Graph::from_edges(&[(0, 1), (0, 2), (0, 3)], RelationshipsConfig::default()).unwrap();
        let mut seen = Vec::new();
        graph.for_each_relationship(0, |_, target| {
            seen.push(target);
            seen.len() < 2
        });
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_weighted_iteration() {
        let config = RelationshipsConfig {
            weighted: true,
            ..RelationshipsConfig::default()
        };
        let graph = Graph::from_weighted_edges(&[(0, 2, 0.5), (0, 1, 1.5), (1, 2, 2.0)], config).unwrap();
        let mut seen = Vec::new();
        graph.for_each_relationship_weighted(0, f64::NAN, |_, target, weight| {
            seen.push((target, weight));
            true
        });
        assert_eq!(seen, vec![(1, 1.5), (2, 0.5)]);
        assert!(graph.has_relationship_property());
    }

    #[test]
    fn test_intersection_requires_undirected() {
        let graph = Graph::from_edges(&[(0, 1)], RelationshipsConfig::default()).unwrap();
        assert!(matches!(graph.intersection(u64::MAX), Err(GraphError::UnsupportedGraph(_))));
    }

    #[test]
    fn test_release_only_frees_last_handle() {
        let tracker = AllocationTracker::new();
        let mut builder = GraphBuilder::new(IdMap::identity(3)).with_tracker(tracker.clone());
        let relationships = {
            let relationships = builder.relationships(RelationshipsConfig::default());
            relationships.add(0, 1).unwrap();
            relationships.add(1, 2).unwrap();
            relationships.build().unwrap()
        };
        builder.add_relationship_type("REL", relationships);
        let graph = builder.build().unwrap();

        let tracked = tracker.tracked();
        assert!(tracked > 0);
        assert_eq!(graph.size_of_bytes(), tracked);

        let copy = graph.concurrent_copy();
        assert_eq!(graph.release(), 0);
        assert_eq!(tracker.tracked(), tracked);
        assert_eq!(copy.release(), tracked);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_multiple_types_merge_sorted() {
        let mut builder = GraphBuilder::new(IdMap::identity(5));
        for (name, edges) in [("A", vec![(0, 3), (0, 1)]), ("B", vec![(0, 2), (0, 4)])] {
            let relationships = {
                let relationships = builder.relationships(RelationshipsConfig::default());
                for (source, target) in edges {
                    relationships.add(source, target).unwrap();
                }
                relationships.build().unwrap()
            };
            builder.add_relationship_type(name, relationships);
        }
        let graph = builder.build().unwrap();

        assert_eq!(graph.cursor(0).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(graph.degree(0), 4);
        assert!(!graph.is_multi_graph());
        assert_eq!(graph.relationship_types().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
