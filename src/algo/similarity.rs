//! Bounded pairwise node similarity
//!
//! Two nodes are compared only when they share at least one neighbor. The
//! candidates of a node are collected through the inverse adjacency: for every
//! neighbor `x` of `u`, every node that also points at `x`. Scores below the
//! cutoff are dropped and each node keeps its best (or worst) `k` partners.

use std::time::Instant;

use serde::Serialize;

use crate::algo::require_simple;
use crate::config::SimilarityConfig;
use crate::error::Result;
use crate::graph::cursor::intersection_size;
use crate::graph::{
    Aggregation, CompressedAdjacencyList, Graph, GraphBuilder, IdMap, NeighborCursor, Orientation,
    RelationshipsBuilder, RelationshipsConfig, NOT_FOUND,
};
use crate::memory::{GraphDimensions, MemoryRange};
use crate::parallel::{range_partition, ProgressTracker, TerminationFlag, WorkerPool};
use crate::queue::BoundedLongLongPriorityQueue;

/// One similarity score between two dense node ids
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityPair {
    pub node1: u64,
    pub node2: u64,
    pub similarity: f64,
}

/// Per-node partner queues and the optional global selection
#[derive(Debug)]
pub struct SimilarityResult {
    /// `(node, partners)` for every compared node with at least one partner, by node
    pub neighbors: Vec<(u64, BoundedLongLongPriorityQueue)>,

    /// Pairs kept overall when a global bound is configured
    pub global: Option<BoundedLongLongPriorityQueue>,

    /// Nodes whose degree passed the cutoff
    pub nodes_compared: u64,

    /// Scores computed, before cutoff and bounds
    pub comparisons: u64,

    pub terminated: bool,

    pub compute_millis: u64,
}

impl SimilarityResult {
    /// Pairs in output order: the global selection when present, otherwise
    /// every node's partners best first, by node
    pub fn stream(&self) -> Box<dyn Iterator<Item = SimilarityPair> + '_> {
        let pair = |(node1, node2, similarity): (u64, u64, f64)| SimilarityPair {
            node1,
            node2,
            similarity,
        };
        match &self.global {
            Some(global) => Box::new(global.iter().map(pair)),
            None => Box::new(
                self.neighbors
                    .iter()
                    .flat_map(move |(_, queue)| queue.iter().map(pair)),
            ),
        }
    }

    /// Number of pairs [`SimilarityResult::stream`] yields
    pub fn pair_count(&self) -> usize {
        match &self.global {
            Some(global) => global.size(),
            None => self.neighbors.iter().map(|(_, queue)| queue.size()).sum(),
        }
    }

    /// Materialize the pairs as a weighted, directed graph over the nodes of `graph`.
    ///
    /// A pair similar in both directions appears as two relationships.
    pub fn to_graph(&self, graph: &Graph, concurrency: usize) -> Result<Graph> {
        let mut builder = GraphBuilder::new(graph.id_map().clone());
        let relationships = {
            let relationships = builder.relationships(RelationshipsConfig {
                orientation: Orientation::Natural,
                aggregation: Aggregation::Single,
                weighted: true,
                concurrency,
                ..RelationshipsConfig::default()
            });
            let mut batch = relationships.batch();
            for pair in self.stream() {
                batch.add_dense(pair.node1, pair.node2, pair.similarity)?;
            }
            drop(batch);
            relationships.build()?
        };
        builder.add_relationship_type("SIMILAR", relationships);
        builder.build()
    }

    pub fn release(self) -> u64 {
        let entry = (2 * std::mem::size_of::<u64>() + std::mem::size_of::<f64>()) as u64;
        let kept: u64 = self
            .neighbors
            .iter()
            .map(|(_, queue)| queue.capacity() as u64)
            .sum::<u64>()
            + self.global.as_ref().map_or(0, |global| global.capacity() as u64);
        kept * entry
    }
}

/// Where candidates come from: the graph itself when undirected, else a reverse copy
enum InverseIndex<'g> {
    Graph(&'g Graph),
    Reverse(CompressedAdjacencyList),
}

impl InverseIndex<'_> {
    /// Call `consumer` for every node pointing at `node`
    fn for_each_source(&self, node: u64, mut consumer: impl FnMut(u64)) {
        match self {
            InverseIndex::Graph(graph) => graph.for_each_relationship(node, |_, source| {
                consumer(source);
                true
            }),
            InverseIndex::Reverse(adjacency) => {
                let mut cursor = adjacency.cursor(node);
                loop {
                    let source = cursor.next_v();
                    if source == NOT_FOUND {
                        break;
                    }
                    consumer(source);
                }
            }
        }
    }
}

fn build_inverse_index<'g>(
    graph: &'g Graph,
    pool: &WorkerPool,
    termination: &TerminationFlag,
) -> Result<InverseIndex<'g>> {
    if graph.is_undirected() {
        return Ok(InverseIndex::Graph(graph));
    }

    let node_count = graph.node_count();
    let id_map = IdMap::identity(node_count);
    let reverse = RelationshipsBuilder::new(
        &id_map,
        RelationshipsConfig {
            orientation: Orientation::Reverse,
            aggregation: Aggregation::Single,
            concurrency: pool.concurrency(),
            ..RelationshipsConfig::default()
        },
    );
    let partitions = range_partition(node_count, pool.concurrency());
    let progress = ProgressTracker::new("NodeSimilarity inverse index", node_count);

    let batches = pool.for_each_partition(
        &partitions,
        termination,
        &progress,
        || reverse.batch(),
        |batch, node| {
            let mut failure = None;
            graph.for_each_relationship(node, |source, target| match batch.add_dense(source, target, 1.0) {
                Ok(()) => true,
                Err(e) => {
                    failure = Some(e);
                    false
                }
            });
            failure.map_or(Ok(()), Err)
        },
    )?;
    drop(batches);

    Ok(InverseIndex::Reverse(reverse.build()?.adjacency))
}

/// Per-worker buffers and accumulated partner queues
struct SimilarityState {
    candidates: Vec<u64>,
    neighbors: Vec<(u64, BoundedLongLongPriorityQueue)>,
    comparisons: u64,
    nodes_compared: u64,
}

/// Score every node against its candidates and keep the bounded best
pub fn compute(
    graph: &Graph,
    config: &SimilarityConfig,
    termination: &TerminationFlag,
) -> Result<SimilarityResult> {
    config.validate()?;
    require_simple(graph, "NodeSimilarity")?;

    let start = Instant::now();
    let node_count = graph.node_count();
    let pool = WorkerPool::new(config.concurrency)?;
    let inverse = build_inverse_index(graph, &pool, termination)?;

    let (capacity, largest) = config.per_node_bound();
    let new_queue = |capacity| {
        if largest {
            BoundedLongLongPriorityQueue::max(capacity)
        } else {
            BoundedLongLongPriorityQueue::min(capacity)
        }
    };

    let progress = ProgressTracker::new("NodeSimilarity", node_count);
    progress.begin();

    let states = pool.for_each_node_balanced(
        node_count,
        config.batch_size,
        termination,
        &progress,
        || SimilarityState {
            candidates: Vec::new(),
            neighbors: Vec::new(),
            comparisons: 0,
            nodes_compared: 0,
        },
        |state, node| {
            let degree = graph.degree(node);
            if degree < config.degree_cutoff {
                return Ok(());
            }
            state.nodes_compared += 1;

            state.candidates.clear();
            graph.for_each_relationship(node, |_, shared| {
                inverse.for_each_source(shared, |candidate| {
                    if candidate != node {
                        state.candidates.push(candidate);
                    }
                });
                true
            });
            state.candidates.sort_unstable();
            state.candidates.dedup();

            let mut queue = new_queue(capacity);
            let mut cursor = graph.raw_cursor();
            let mut other = graph.raw_cursor();
            for &candidate in &state.candidates {
                let candidate_degree = graph.degree(candidate);
                if candidate_degree < config.degree_cutoff {
                    continue;
                }
                cursor.init(node);
                other.init(candidate);
                let shared = intersection_size(&mut cursor, &mut other);
                let score = config.metric.score(degree, candidate_degree, shared);
                state.comparisons += 1;
                if score >= config.similarity_cutoff {
                    queue.offer(node, candidate, score);
                }
            }
            if !queue.is_empty() {
                state.neighbors.push((node, queue));
            }
            Ok(())
        },
    )?;
    progress.end();

    let comparisons = states.iter().map(|state| state.comparisons).sum();
    let nodes_compared = states.iter().map(|state| state.nodes_compared).sum();
    let mut neighbors: Vec<_> = states.into_iter().flat_map(|state| state.neighbors).collect();
    neighbors.sort_unstable_by_key(|(node, _)| *node);

    let global = config.global_bound().map(|(capacity, largest)| {
        let mut global = if largest {
            BoundedLongLongPriorityQueue::max(capacity)
        } else {
            BoundedLongLongPriorityQueue::min(capacity)
        };
        for (_, queue) in &neighbors {
            global.merge(queue);
        }
        global
    });

    let terminated = termination.is_terminated();
    let compute_millis = start.elapsed().as_millis() as u64;
    log::info!(
        "Compared {} nodes with {} {:?} scores in {} ms{}",
        nodes_compared,
        comparisons,
        config.metric,
        compute_millis,
        if terminated { " (terminated)" } else { "" }
    );

    Ok(SimilarityResult {
        neighbors,
        global,
        nodes_compared,
        comparisons,
        terminated,
        compute_millis,
    })
}

/// Bounds for the memory similarity needs on top of the graph
pub fn memory_estimation(dimensions: &GraphDimensions, config: &SimilarityConfig) -> MemoryRange {
    let entry = (2 * std::mem::size_of::<u64>() + std::mem::size_of::<f64>()) as u64;
    let (capacity, _) = config.per_node_bound();
    let per_node = MemoryRange::between(0, dimensions.node_count * capacity as u64 * entry);
    let global = config
        .global_bound()
        .map_or(0, |(capacity, _)| capacity as u64 * entry);
    // A directed graph needs a reverse copy of its topology
    let inverse = CompressedAdjacencyList::memory_estimation(dimensions.node_count, dimensions.relationship_count);
    let candidates = MemoryRange::between(0, dimensions.relationship_count * 8).times(config.concurrency as u64);

    MemoryRange::between(0, inverse.max) + per_node + MemoryRange::of(global) + candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::config::SimilarityMetric;
    use crate::error::GraphError;

    fn bipartite() -> Graph {
        // Person 100 likes 1, 2, 3; person 200 likes 1, 2; person 300 likes 3
        Graph::from_edges(
            &[(100, 1), (100, 2), (100, 3), (200, 1), (200, 2), (300, 3)],
            RelationshipsConfig {
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap()
    }

    fn config() -> SimilarityConfig {
        SimilarityConfig {
            concurrency: 2,
            ..SimilarityConfig::default()
        }
    }

    fn pairs(graph: &Graph, result: &SimilarityResult) -> Vec<(u64, u64, f64)> {
        result
            .stream()
            .map(|pair| (graph.to_original(pair.node1), graph.to_original(pair.node2), pair.similarity))
            .collect()
    }

    #[test]
    fn test_jaccard_of_shared_neighbors() {
        let graph = bipartite();
        let result = compute(&graph, &config(), &TerminationFlag::running()).unwrap();
        assert_eq!(
            pairs(&graph, &result),
            vec![
                (100, 200, 2.0 / 3.0),
                (100, 300, 1.0 / 3.0),
                (200, 100, 2.0 / 3.0),
                (300, 100, 1.0 / 3.0),
            ]
        );
        // Item nodes have no outgoing relationships and are never compared
        assert_eq!(result.nodes_compared, 3);
    }

    #[test]
    fn test_scores_are_symmetric_and_exact() {
        // Neighbor heads interleave, e.g. {5, 9} against {4, 9}
        let edges = [
            (100, 5),
            (100, 9),
            (200, 4),
            (200, 9),
            (300, 1),
            (300, 4),
            (300, 5),
            (300, 9),
            (400, 2),
            (400, 3),
            (400, 9),
        ];
        let graph = Graph::from_edges(
            &edges,
            RelationshipsConfig {
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();
        let all = SimilarityConfig {
            top_k: Some(10),
            ..config()
        };
        let result = compute(&graph, &all, &TerminationFlag::running()).unwrap();
        let found = pairs(&graph, &result);

        let neighbors = |person: u64| -> BTreeSet<u64> {
            edges
                .iter()
                .filter(|(source, _)| *source == person)
                .map(|(_, target)| *target)
                .collect()
        };
        for left in [100, 200, 300, 400] {
            for right in [100, 200, 300, 400] {
                if left == right {
                    continue;
                }
                let (a, b) = (neighbors(left), neighbors(right));
                let shared = a.intersection(&b).count();
                let expected = shared as f64 / (a.len() + b.len() - shared) as f64;
                let score = found
                    .iter()
                    .find(|(node1, node2, _)| *node1 == left && *node2 == right)
                    .map(|(_, _, score)| *score);
                assert_eq!(score, Some(expected), "{} -> {}", left, right);
            }
        }
    }

    #[test]
    fn test_top_k_and_top_n() {
        let graph = bipartite();
        let top_one = SimilarityConfig {
            top_k: Some(1),
            ..config()
        };
        let result = compute(&graph, &top_one, &TerminationFlag::running()).unwrap();
        assert!(result.neighbors.iter().all(|(_, queue)| queue.size() == 1));
        assert_eq!(pairs(&graph, &result)[0], (100, 200, 2.0 / 3.0));

        let global = SimilarityConfig {
            top_n: Some(1),
            ..config()
        };
        let result = compute(&graph, &global, &TerminationFlag::running()).unwrap();
        assert_eq!(pairs(&graph, &result), vec![(100, 200, 2.0 / 3.0)]);
    }

    #[test]
    fn test_bottom_k_and_cutoff() {
        let graph = bipartite();
        let bottom = SimilarityConfig {
            bottom_k: Some(1),
            ..config()
        };
        let result = compute(&graph, &bottom, &TerminationFlag::running()).unwrap();
        assert_eq!(pairs(&graph, &result)[0], (100, 300, 1.0 / 3.0));

        let strict = SimilarityConfig {
            similarity_cutoff: 0.5,
            ..config()
        };
        let result = compute(&graph, &strict, &TerminationFlag::running()).unwrap();
        assert_eq!(result.pair_count(), 2);
    }

    #[test]
    fn test_overlap_and_degree_cutoff() {
        let graph = bipartite();
        let overlap = SimilarityConfig {
            metric: SimilarityMetric::Overlap,
            degree_cutoff: 2,
            ..config()
        };
        let result = compute(&graph, &overlap, &TerminationFlag::running()).unwrap();
        assert_eq!(pairs(&graph, &result), vec![(100, 200, 1.0), (200, 100, 1.0)]);
    }

    #[test]
    fn test_undirected_uses_graph_as_index() {
        let graph = Graph::from_edges(
            &[(0, 1), (0, 2), (3, 1), (3, 2)],
            RelationshipsConfig {
                orientation: Orientation::Undirected,
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();
        let result = compute(&graph, &config(), &TerminationFlag::running()).unwrap();
        let found = pairs(&graph, &result);
        assert!(found.contains(&(0, 3, 1.0)));
        assert!(found.contains(&(1, 2, 1.0)));
    }

    #[test]
    fn test_to_graph_keeps_scores() {
        let graph = bipartite();
        let result = compute(&graph, &config(), &TerminationFlag::running()).unwrap();
        let similar = result.to_graph(&graph, 2).unwrap();

        assert_eq!(similar.node_count(), graph.node_count());
        assert_eq!(similar.relationship_count(), 4);
        let source = similar.to_mapped(100).unwrap();
        let mut weights = Vec::new();
        similar.for_each_relationship_weighted(source, f64::NAN, |_, target, weight| {
            weights.push((similar.to_original(target), weight));
            true
        });
        assert_eq!(weights, vec![(200, 2.0 / 3.0), (300, 1.0 / 3.0)]);
    }

    #[test]
    fn test_multigraph_rejected() {
        let graph = Graph::from_edges(&[(0, 1), (0, 1)], RelationshipsConfig::default()).unwrap();
        assert!(matches!(
            compute(&graph, &config(), &TerminationFlag::running()),
            Err(GraphError::UnsupportedGraph(_))
        ));
    }
}
