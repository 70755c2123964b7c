//! Graph algorithms running on the worker pool
//!
//! Every algorithm is a free `compute(graph, config, termination)` function
//! returning a result that records whether the run was cut short, plus a
//! `memory_estimation(dimensions, config)` for admission control.

pub mod betweenness;
pub mod similarity;
pub mod triangles;

pub use betweenness::BetweennessResult;
pub use similarity::{SimilarityPair, SimilarityResult};
pub use triangles::TriangleCountResult;

use crate::error::{GraphError, Result};
use crate::graph::Graph;

/// Fail when `graph` has parallel relationships, which set-based scores cannot handle
pub(crate) fn require_simple(graph: &Graph, task: &str) -> Result<()> {
    if graph.is_multi_graph() {
        return Err(GraphError::UnsupportedGraph(format!(
            "{} requires a graph without parallel relationships; use an aggregation other than NONE",
            task
        )));
    }
    Ok(())
}
