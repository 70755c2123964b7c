//! Cluster analysis module

pub mod detection;
pub mod metrics;

use serde::{Deserialize, Serialize};

pub use detection::{compute, find_clusters, ComponentsResult, DisjointSets};

/// Represents a cluster (weakly connected component) in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Position of this cluster in the size ordering
    pub id: u64,

    /// Smallest dense id of the component
    pub representative: u64,

    /// Members of this cluster (dense node ids, ascending)
    pub members: Vec<u64>,

    /// Size of the cluster
    pub size: usize,

    /// Density: actual relationships / potential relationships
    pub density: f64,

    /// Central nodes using various centrality measures
    pub central_nodes: ClusterCentralNodes,
}

/// Key nodes in a cluster identified by different centrality measures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterCentralNodes {
    /// Nodes with highest degree inside the cluster
    pub degree: Vec<u64>,

    /// Nodes with highest betweenness centrality (if computed)
    pub betweenness: Option<Vec<u64>>,
}
