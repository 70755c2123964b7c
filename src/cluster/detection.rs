//! Cluster detection algorithms

use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;

use crate::cluster::metrics::{calculate_density, degree_central_nodes};
use crate::cluster::{Cluster, ClusterCentralNodes};
use crate::config::ComponentsConfig;
use crate::error::Result;
use crate::graph::Graph;
use crate::memory::{GraphDimensions, HugeAtomicLongArray, HugeLongArray, MemoryRange};
use crate::parallel::{range_partition, ProgressTracker, TerminationFlag, WorkerPool};

/// Lock-free union-find over dense node ids.
///
/// A root is always linked under the smaller of the two roots, so every set
/// is represented by its smallest member and parents never exceed children.
#[derive(Debug)]
pub struct DisjointSets {
    parent: HugeAtomicLongArray,
}

impl DisjointSets {
    /// Create a new DisjointSets data structure with every node in its own set
    pub fn new(size: u64) -> Self {
        Self {
            parent: HugeAtomicLongArray::from_fn(size, |node| node),
        }
    }

    /// Root of the set containing `node`, halving the path on the way
    pub fn find(&self, node: u64) -> u64 {
        let mut current = node;
        loop {
            let parent = self.parent.get(current);
            if parent == current {
                return current;
            }
            let grandparent = self.parent.get(parent);
            if grandparent != parent {
                // Losing this race only means the path stays longer
                self.parent.compare_and_set(current, parent, grandparent);
            }
            current = grandparent;
        }
    }

    /// Merge the sets containing `left` and `right`
    pub fn union(&self, left: u64, right: u64) {
        loop {
            let left_root = self.find(left);
            let right_root = self.find(right);
            if left_root == right_root {
                return;
            }
            let (small, large) = if left_root < right_root {
                (left_root, right_root)
            } else {
                (right_root, left_root)
            };
            if self.parent.compare_and_set(large, large, small) {
                return;
            }
        }
    }

    pub fn same_set(&self, left: u64, right: u64) -> bool {
        self.find(left) == self.find(right)
    }

    pub fn size(&self) -> u64 {
        self.parent.size()
    }
}

/// Component representative per node
#[derive(Debug)]
pub struct ComponentsResult {
    /// Smallest dense id of each node's component
    pub components: HugeLongArray,

    pub component_count: u64,

    /// Set when the run was cancelled; components may then be split
    pub terminated: bool,

    pub compute_millis: u64,
}

impl ComponentsResult {
    pub fn release(self) -> u64 {
        self.components.size_of_bytes()
    }
}

/// Weakly connected components, ignoring relationship direction
pub fn compute(
    graph: &Graph,
    config: &ComponentsConfig,
    termination: &TerminationFlag,
) -> Result<ComponentsResult> {
    config.validate()?;
    log::info!("Finding connected components with {} workers", config.concurrency);

    let start = Instant::now();
    let node_count = graph.node_count();
    let sets = DisjointSets::new(node_count);
    let pool = WorkerPool::new(config.concurrency)?;
    let partitions = range_partition(node_count, config.concurrency);
    let progress = ProgressTracker::new("WCC", node_count);
    progress.begin();

    pool.for_each_partition(
        &partitions,
        termination,
        &progress,
        || (),
        |_, node| {
            graph.for_each_relationship(node, |source, target| {
                sets.union(source, target);
                true
            });
            Ok(())
        },
    )?;
    progress.end();

    let components = HugeLongArray::from_fn(node_count, |node| sets.find(node));
    let component_count = components
        .iter()
        .enumerate()
        .filter(|&(node, component)| node as u64 == component)
        .count() as u64;

    let terminated = termination.is_terminated();
    let compute_millis = start.elapsed().as_millis() as u64;
    log::info!(
        "Found {} components over {} nodes in {} ms{}",
        component_count,
        node_count,
        compute_millis,
        if terminated { " (terminated)" } else { "" }
    );

    Ok(ComponentsResult {
        components,
        component_count,
        terminated,
        compute_millis,
    })
}

/// Materialize components with at least `min_cluster_size` members, largest first
pub fn find_clusters(graph: &Graph, result: &ComponentsResult, min_cluster_size: usize) -> Vec<Cluster> {
    let node_count = result.components.size();
    log::info!("Grouping {} nodes by connected component", node_count);

    let chunk_size = 10_000u64;
    let chunk_count = node_count.div_ceil(chunk_size);

    // Group per chunk in parallel, then combine
    let component_maps: Vec<HashMap<u64, Vec<u64>>> = (0..chunk_count)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * chunk_size;
            let end = (start + chunk_size).min(node_count);
            let mut local: HashMap<u64, Vec<u64>> = HashMap::new();
            for node in start..end {
                local.entry(result.components.get(node)).or_default().push(node);
            }
            local
        })
        .collect();

    // Chunks are combined in node order, so member lists stay ascending
    let mut combined: HashMap<u64, Vec<u64>> = HashMap::new();
    for map in component_maps {
        for (representative, mut members) in map {
            combined.entry(representative).or_default().append(&mut members);
        }
    }

    let mut clusters: Vec<Cluster> = combined
        .into_par_iter()
        .filter(|(_, members)| members.len() >= min_cluster_size)
        .map(|(representative, members)| Cluster {
            id: 0,
            representative,
            size: members.len(),
            density: calculate_density(graph, &members),
            central_nodes: ClusterCentralNodes {
                degree: degree_central_nodes(graph, &members, 5),
                betweenness: None,
            },
            members,
        })
        .collect();

    clusters.sort_by(|a, b| b.size.cmp(&a.size).then(a.representative.cmp(&b.representative)));
    for (id, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = id as u64;
    }

    log::info!(
        "Found {} clusters with {} or more members",
        clusters.len(),
        min_cluster_size
    );
    clusters
}

/// Bounds for the memory components need on top of the graph
pub fn memory_estimation(dimensions: &GraphDimensions, _config: &ComponentsConfig) -> MemoryRange {
    MemoryRange::of(
        HugeAtomicLongArray::memory_estimation(dimensions.node_count)
            + HugeLongArray::memory_estimation(dimensions.node_count),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{IdMap, RelationshipsConfig};
    use petgraph::graph::{NodeIndex, UnGraph};

    fn config(concurrency: usize) -> ComponentsConfig {
        ComponentsConfig {
            concurrency,
            min_cluster_size: 1,
        }
    }

    fn identity_graph(node_count: u64, edges: &[(u64, u64)]) -> Graph {
        let mut builder = crate::graph::GraphBuilder::new(IdMap::identity(node_count));
        let relationships = {
            let relationships = builder.relationships(RelationshipsConfig::default());
            for &(source, target) in edges {
                relationships.add(source, target).unwrap();
            }
            relationships.build().unwrap()
        };
        builder.add_relationship_type("REL", relationships);
        builder.build().unwrap()
    }

    #[test]
    fn test_disjoint_sets_keep_smallest_root() {
        let sets = DisjointSets::new(6);
        sets.union(5, 3);
        sets.union(3, 4);
        sets.union(4, 1);
        assert_eq!(sets.find(5), 1);
        assert!(sets.same_set(3, 1));
        assert!(!sets.same_set(0, 1));
    }

    #[test]
    fn test_direction_is_ignored() {
        // 0 -> 1 <- 2 and 3 -> 4, node 5 isolated
        let graph = identity_graph(6, &[(0, 1), (2, 1), (3, 4)]);
        let result = compute(&graph, &config(2), &TerminationFlag::running()).unwrap();
        assert_eq!(result.components.iter().collect::<Vec<_>>(), vec![0, 0, 0, 3, 3, 5]);
        assert_eq!(result.component_count, 3);
    }

    #[test]
    fn test_clusters_sorted_by_size() {
        let graph = identity_graph(7, &[(4, 5), (5, 6), (6, 4), (0, 1)]);
        let result = compute(&graph, &config(3), &TerminationFlag::running()).unwrap();
        let clusters = find_clusters(&graph, &result, 2);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![4, 5, 6]);
        assert_eq!(clusters[0].id, 0);
        assert_eq!(clusters[0].representative, 4);
        assert!((clusters[0].density - 0.5).abs() < 1e-12);
        assert_eq!(clusters[1].members, vec![0, 1]);
    }

    #[test]
    fn test_matches_reference_component_count() {
        let node_count = 2_000u64;
        let edges: Vec<(u64, u64)> = (0..1_500u64)
            .map(|index| ((index * 7_919) % node_count, (index * 104_729 + 13) % node_count))
            .collect();

        let mut reference = UnGraph::<(), ()>::new_undirected();
        for _ in 0..node_count {
            reference.add_node(());
        }
        for &(source, target) in &edges {
            reference.add_edge(NodeIndex::new(source as usize), NodeIndex::new(target as usize), ());
        }

        let graph = identity_graph(node_count, &edges);
        for concurrency in [1, 4] {
            let result = compute(&graph, &config(concurrency), &TerminationFlag::running()).unwrap();
            assert_eq!(
                result.component_count as usize,
                petgraph::algo::connected_components(&reference)
            );
        }
    }
}
