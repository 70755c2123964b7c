//! Triangle counting and local clustering coefficients

use std::time::Instant;

use crate::config::TriangleCountConfig;
use crate::error::Result;
use crate::graph::{Graph, RelationshipIntersect};
use crate::memory::{GraphDimensions, HugeAtomicLongArray, HugeDoubleArray, HugeLongArray, MemoryRange};
use crate::parallel::{ProgressTracker, TerminationFlag, WorkerPool};

/// Nodes a worker claims from the shared counter at once
const BATCH_SIZE: u64 = 64;

/// Triangles per node, globally, and the derived clustering coefficients
#[derive(Debug)]
pub struct TriangleCountResult {
    /// Triangles each node takes part in
    pub local_triangles: HugeLongArray,

    /// Each triangle counted once
    pub global_triangles: u64,

    /// `2 * t(v) / (d(v) * (d(v) - 1))`, zero below degree two
    pub local_clustering: HugeDoubleArray,

    pub average_clustering: f64,

    /// Set when the run was cancelled; counts are then lower bounds
    pub terminated: bool,

    pub compute_millis: u64,
}

impl TriangleCountResult {
    pub fn size_of_bytes(&self) -> u64 {
        self.local_triangles.size_of_bytes() + self.local_clustering.size_of_bytes()
    }

    /// Free the per-node arrays, returning the bytes released
    pub fn release(self) -> u64 {
        self.size_of_bytes()
    }
}

/// Count triangles of an undirected graph without parallel relationships
pub fn compute(
    graph: &Graph,
    config: &TriangleCountConfig,
    termination: &TerminationFlag,
) -> Result<TriangleCountResult> {
    config.validate()?;
    // Fails for directed graphs and multigraphs before any work starts
    graph.intersection(config.max_degree)?;

    let start = Instant::now();
    let node_count = graph.node_count();
    let local = HugeAtomicLongArray::new(node_count);
    let pool = WorkerPool::new(config.concurrency)?;
    let progress = ProgressTracker::new("TriangleCount", node_count);
    progress.begin();

    let counts = pool.for_each_node_balanced(
        node_count,
        BATCH_SIZE,
        termination,
        &progress,
        || (RelationshipIntersect::new(graph, config.max_degree), 0u64),
        |state: &mut (RelationshipIntersect<'_>, u64), node| {
            let (intersect, count) = state;
            intersect.intersect_all(node, |a, b, c| {
                local.get_and_add(a, 1);
                local.get_and_add(b, 1);
                local.get_and_add(c, 1);
                *count += 1;
            });
            Ok(())
        },
    )?;
    progress.end();

    let global_triangles = counts.iter().map(|(_, count)| count).sum::<u64>();
    let local_triangles = local.into_huge_array();
    let local_clustering = HugeDoubleArray::from_fn(node_count, |node| {
        clustering_coefficient(local_triangles.get(node), graph.degree(node) as u64)
    });
    let average_clustering = if node_count == 0 {
        0.0
    } else {
        local_clustering.iter().sum::<f64>() / node_count as f64
    };

    let terminated = termination.is_terminated();
    let compute_millis = start.elapsed().as_millis() as u64;
    log::info!(
        "Counted {} triangles over {} nodes in {} ms{}",
        global_triangles,
        node_count,
        compute_millis,
        if terminated { " (terminated)" } else { "" }
    );

    Ok(TriangleCountResult {
        local_triangles,
        global_triangles,
        local_clustering,
        average_clustering,
        terminated,
        compute_millis,
    })
}

fn clustering_coefficient(triangles: u64, degree: u64) -> f64 {
    if degree < 2 {
        return 0.0;
    }
    (2 * triangles) as f64 / (degree * (degree - 1)) as f64
}

/// Bounds for the memory triangle counting needs on top of the graph
pub fn memory_estimation(dimensions: &GraphDimensions, config: &TriangleCountConfig) -> MemoryRange {
    let per_node = HugeAtomicLongArray::memory_estimation(dimensions.node_count)
        + HugeDoubleArray::memory_estimation(dimensions.node_count);
    // Three cursors per worker, each holding one decoded block
    let per_worker = 3 * crate::graph::cursor::BLOCK_SIZE as u64 * 8;
    MemoryRange::of(per_node) + MemoryRange::of(per_worker).times(config.concurrency as u64)
}
