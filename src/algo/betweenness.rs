//! Betweenness centrality after Brandes
//!
//! One shortest-path search per source node: breadth-first by hop count, or
//! Dijkstra over relationship weights. Sources are pulled from a shared
//! counter; every worker keeps its own search buffers and adds dependencies
//! into a shared array of doubles with CAS.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

use rayon::prelude::*;

use crate::config::BetweennessConfig;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::memory::{
    GraphDimensions, HugeArray, HugeAtomicDoubleArray, HugeDoubleArray, HugeLongArray, MemoryRange,
};
use crate::parallel::{ProgressTracker, TerminationFlag, WorkerPool};

/// Centrality score per node
#[derive(Debug)]
pub struct BetweennessResult {
    pub scores: HugeDoubleArray,

    /// Set when the run was cancelled; scores then cover only the finished sources
    pub terminated: bool,

    pub compute_millis: u64,
}

impl BetweennessResult {
    pub fn min(&self) -> f64 {
        self.scores.iter().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.scores.iter().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn mean(&self) -> f64 {
        if self.scores.size() == 0 {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.size() as f64
    }

    pub fn release(self) -> u64 {
        self.scores.size_of_bytes()
    }
}

/// Dijkstra frontier entry; the heap pops the cheapest node first
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tentative {
    cost: f64,
    node: u64,
}

impl Eq for Tentative {}

impl Ord for Tentative {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Tentative {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-worker search state, reset after every source
struct BrandesState {
    sigma: HugeLongArray,
    delta: HugeDoubleArray,
    /// Hop distance plus one, or a settled marker for weighted searches; zero
    /// marks an unvisited node
    distance: HugeLongArray,
    /// Tentative path cost, allocated for weighted searches only
    cost: Option<HugeDoubleArray>,
    predecessors: Vec<Vec<u64>>,
    queue: VecDeque<u64>,
    heap: BinaryHeap<Tentative>,
    stack: Vec<u64>,
}

impl BrandesState {
    fn new(node_count: u64, weighted: bool) -> Self {
        Self {
            sigma: HugeArray::new(node_count),
            delta: HugeArray::new(node_count),
            distance: HugeArray::new(node_count),
            cost: weighted.then(|| HugeDoubleArray::from_fn(node_count, |_| f64::INFINITY)),
            predecessors: vec![Vec::new(); node_count as usize],
            queue: VecDeque::new(),
            heap: BinaryHeap::new(),
            stack: Vec::new(),
        }
    }

    fn single_source(&mut self, graph: &Graph, source: u64, centrality: &HugeAtomicDoubleArray) {
        if self.cost.is_some() {
            self.dijkstra(graph, source);
        } else {
            self.breadth_first(graph, source);
        }
        self.accumulate(source, centrality);
    }

    fn breadth_first(&mut self, graph: &Graph, source: u64) {
        let BrandesState {
            sigma,
            distance,
            predecessors,
            queue,
            stack,
            ..
        } = self;

        sigma.set(source, 1);
        distance.set(source, 1);
        queue.push_back(source);

        while let Some(node) = queue.pop_front() {
            stack.push(node);
            let next_distance = distance.get(node) + 1;
            let node_sigma = sigma.get(node);
            graph.for_each_relationship(node, |_, target| {
                if distance.get(target) == 0 {
                    distance.set(target, next_distance);
                    queue.push_back(target);
                }
                if distance.get(target) == next_distance {
                    sigma.update(target, |paths| paths.saturating_add(node_sigma));
                    predecessors[target as usize].push(node);
                }
                true
            });
        }
    }

    fn dijkstra(&mut self, graph: &Graph, source: u64) {
        let BrandesState {
            sigma,
            distance: settled,
            cost: Some(cost),
            predecessors,
            heap,
            stack,
            ..
        } = self
        else {
            return;
        };

        sigma.set(source, 1);
        cost.set(source, 0.0);
        heap.push(Tentative { cost: 0.0, node: source });

        while let Some(Tentative { cost: node_cost, node }) = heap.pop() {
            // Stale entry for a node that was reached more cheaply since
            if settled.get(node) != 0 || node_cost > cost.get(node) {
                continue;
            }
            settled.set(node, 1);
            stack.push(node);
            let node_sigma = sigma.get(node);
            graph.for_each_relationship_weighted(node, 1.0, |_, target, weight| {
                if settled.get(target) != 0 {
                    return true;
                }
                let candidate = node_cost + weight;
                let known = cost.get(target);
                if candidate < known {
                    cost.set(target, candidate);
                    sigma.set(target, node_sigma);
                    predecessors[target as usize].clear();
                    predecessors[target as usize].push(node);
                    heap.push(Tentative {
                        cost: candidate,
                        node: target,
                    });
                } else if candidate == known {
                    sigma.update(target, |paths| paths.saturating_add(node_sigma));
                    predecessors[target as usize].push(node);
                }
                true
            });
        }
    }

    /// Dependencies flow back in reverse settling order
    fn accumulate(&mut self, source: u64, centrality: &HugeAtomicDoubleArray) {
        while let Some(node) = self.stack.pop() {
            let node_delta = self.delta.get(node);
            let node_sigma = self.sigma.get(node) as f64;
            for &predecessor in &self.predecessors[node as usize] {
                let share = self.sigma.get(predecessor) as f64 / node_sigma * (1.0 + node_delta);
                self.delta.update(predecessor, |value| value + share);
            }
            if node != source {
                centrality.get_and_add(node, node_delta);
            }

            self.sigma.set(node, 0);
            self.delta.set(node, 0.0);
            self.distance.set(node, 0);
            if let Some(cost) = &mut self.cost {
                cost.set(node, f64::INFINITY);
            }
            self.predecessors[node as usize].clear();
        }
    }
}

/// Weighted searches need a positive, finite weight on every relationship
fn check_weights(graph: &Graph, pool: &WorkerPool) -> Result<()> {
    if !graph.has_relationship_property() {
        return Err(GraphError::UnsupportedGraph(
            "weighted betweenness requires a relationship weight property".to_string(),
        ));
    }
    let invalid = pool.install(|| {
        (0..graph.node_count()).into_par_iter().find_any(|&node| {
            let mut invalid = false;
            graph.for_each_relationship_weighted(node, 1.0, |_, _, weight| {
                invalid = !(weight > 0.0 && weight.is_finite());
                !invalid
            });
            invalid
        })
    });
    match invalid {
        Some(node) => Err(GraphError::UnsupportedGraph(format!(
            "weighted betweenness requires positive finite weights, node {} has another",
            graph.to_original(node)
        ))),
        None => Ok(()),
    }
}

/// Exact betweenness centrality for every node
pub fn compute(
    graph: &Graph,
    config: &BetweennessConfig,
    termination: &TerminationFlag,
) -> Result<BetweennessResult> {
    config.validate()?;

    let start = Instant::now();
    let node_count = graph.node_count();
    let centrality = HugeAtomicDoubleArray::new(node_count);
    let pool = WorkerPool::new(config.concurrency)?;
    if config.weighted {
        check_weights(graph, &pool)?;
    }
    let progress = ProgressTracker::new("Betweenness", node_count);
    progress.begin();

    pool.for_each_node_balanced(
        node_count,
        config.batch_size,
        termination,
        &progress,
        || BrandesState::new(node_count, config.weighted),
        |state, source| {
            state.single_source(graph, source, &centrality);
            Ok(())
        },
    )?;
    progress.end();

    let mut scores = centrality.into_huge_array();
    if graph.is_undirected() {
        // Every shortest path was found from both of its ends
        for node in 0..node_count {
            scores.update(node, |score| score / 2.0);
        }
    }

    let terminated = termination.is_terminated();
    let compute_millis = start.elapsed().as_millis() as u64;
    log::info!(
        "Computed betweenness for {} nodes in {} ms{}",
        node_count,
        compute_millis,
        if terminated { " (terminated)" } else { "" }
    );

    Ok(BetweennessResult {
        scores,
        terminated,
        compute_millis,
    })
}

/// Bounds for the memory betweenness needs on top of the graph
pub fn memory_estimation(dimensions: &GraphDimensions, config: &BetweennessConfig) -> MemoryRange {
    let node_count = dimensions.node_count;
    let scores = HugeAtomicDoubleArray::memory_estimation(node_count);

    let mut buffers = HugeLongArray::memory_estimation(node_count) * 2
        + HugeDoubleArray::memory_estimation(node_count)
        + node_count * std::mem::size_of::<Vec<u64>>() as u64;
    if config.weighted {
        buffers += HugeDoubleArray::memory_estimation(node_count);
    }
    // Predecessor lists hold at most one entry per relationship
    let per_worker = MemoryRange::between(
        buffers,
        buffers + dimensions.relationship_count * std::mem::size_of::<u64>() as u64 + node_count * 16,
    );

    MemoryRange::of(scores) + per_worker.times(config.concurrency as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Aggregation, Orientation, RelationshipsConfig};

    fn config(concurrency: usize) -> BetweennessConfig {
        BetweennessConfig {
            concurrency,
            ..BetweennessConfig::default()
        }
    }

    fn scores(graph: &Graph, concurrency: usize) -> Vec<f64> {
        compute(graph, &config(concurrency), &TerminationFlag::running())
            .unwrap()
            .scores
            .iter()
            .collect()
    }

    #[test]
    fn test_undirected_path() {
        let graph = Graph::from_edges(
            &[(0, 1), (1, 2), (2, 3)],
            RelationshipsConfig {
                orientation: Orientation::Undirected,
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();
        assert_eq!(scores(&graph, 2), vec![0.0, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_directed_star_and_split_paths() {
        // Two shortest paths 0 -> 3, through 1 and through 2
        let graph = Graph::from_edges(&[(0, 1), (0, 2), (1, 3), (2, 3)], RelationshipsConfig::default()).unwrap();
        assert_eq!(scores(&graph, 1), vec![0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_concurrency_does_not_change_scores() {
        let edges: Vec<(u64, u64)> = (0..60u64)
            .flat_map(|node| [(node, (node * 7 + 1) % 60), (node, (node * 13 + 5) % 60)])
            .collect();
        let graph = Graph::from_edges(
            &edges,
            RelationshipsConfig {
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();

        let single = scores(&graph, 1);
        let parallel = scores(&graph, 4);
        for (left, right) in single.iter().zip(&parallel) {
            assert!((left - right).abs() < 1e-9);
        }
    }

    fn weighted_graph(edges: &[(u64, u64, f64)], orientation: Orientation) -> Graph {
        Graph::from_weighted_edges(
            edges,
            RelationshipsConfig {
                orientation,
                aggregation: Aggregation::Single,
                weighted: true,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap()
    }

    fn weighted_scores(graph: &Graph, concurrency: usize) -> Result<Vec<f64>> {
        let config = BetweennessConfig {
            weighted: true,
            ..config(concurrency)
        };
        Ok(compute(graph, &config, &TerminationFlag::running())?.scores.iter().collect())
    }

    #[test]
    fn test_weighted_follows_cheapest_path() {
        // 0 -> 1 -> 3 costs 2, 0 -> 2 -> 3 costs 6
        let graph = weighted_graph(
            &[(0, 1, 1.0), (0, 2, 1.0), (1, 3, 1.0), (2, 3, 5.0)],
            Orientation::Natural,
        );
        assert_eq!(weighted_scores(&graph, 2).unwrap(), vec![0.0, 1.0, 0.0, 0.0]);
        assert_eq!(scores(&graph, 2), vec![0.0, 0.5, 0.5, 0.0]);

        let tied = weighted_graph(
            &[(0, 1, 2.0), (0, 2, 1.0), (1, 3, 1.0), (2, 3, 2.0)],
            Orientation::Natural,
        );
        assert_eq!(weighted_scores(&tied, 1).unwrap(), vec![0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_weighted_detour_beats_hop_count() {
        // The direct edge 0 - 2 is heavier than the detour through 1
        let graph = weighted_graph(
            &[(0, 1, 1.0), (1, 2, 1.0), (0, 2, 10.0), (2, 3, 1.0)],
            Orientation::Undirected,
        );
        assert_eq!(weighted_scores(&graph, 4).unwrap(), vec![0.0, 2.0, 2.0, 0.0]);
        assert_eq!(scores(&graph, 4), vec![0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_weighted_requires_weights() {
        let unweighted = Graph::from_edges(&[(0, 1), (1, 2)], RelationshipsConfig::default()).unwrap();
        assert!(matches!(
            weighted_scores(&unweighted, 1),
            Err(GraphError::UnsupportedGraph(_))
        ));

        let negative = weighted_graph(&[(0, 1, 1.0), (1, 2, -1.0)], Orientation::Natural);
        assert!(matches!(
            weighted_scores(&negative, 1),
            Err(GraphError::UnsupportedGraph(_))
        ));
    }

    #[test]
    fn test_weighted_concurrency_does_not_change_scores() {
        let edges: Vec<(u64, u64, f64)> = (0..60u64)
            .flat_map(|node| {
                [
                    (node, (node * 7 + 1) % 60, (node % 3 + 1) as f64),
                    (node, (node * 13 + 5) % 60, (node % 5 + 1) as f64),
                ]
            })
            .collect();
        let graph = weighted_graph(&edges, Orientation::Natural);

        let single = weighted_scores(&graph, 1).unwrap();
        let parallel = weighted_scores(&graph, 4).unwrap();
        for (left, right) in single.iter().zip(&parallel) {
            assert!((left - right).abs() < 1e-9);
        }
    }

    #[test]
    fn test_termination_during_run() {
        // Complete scores on an odd ring are (n - 1)(n - 3) / 8 per node
        let n = 20_001u64;
        let edges: Vec<(u64, u64)> = (0..n).map(|node| (node, (node + 1) % n)).collect();
        let graph = Graph::from_edges(
            &edges,
            RelationshipsConfig {
                orientation: Orientation::Undirected,
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();

        let termination = TerminationFlag::running();
        let result = std::thread::scope(|scope| {
            let host = termination.clone();
            scope.spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                host.terminate();
            });
            compute(&graph, &config(2), &termination).unwrap()
        });

        assert!(result.terminated);
        let complete = ((n - 1) * (n - 3) / 8) as f64;
        let total: f64 = result.scores.iter().sum();
        assert!(total < complete * n as f64 * 0.99);
    }

    #[test]
    fn test_result_statistics() {
        let result = BetweennessResult {
            scores: HugeDoubleArray::from_fn(3, |node| node as f64),
            terminated: false,
            compute_millis: 0,
        };
        assert_eq!(result.min(), 0.0);
        assert_eq!(result.max(), 2.0);
        assert_eq!(result.mean(), 1.0);
    }
}
