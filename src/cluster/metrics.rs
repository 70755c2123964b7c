//! Cluster statistics and metrics

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use serde::Serialize;

use crate::algo::BetweennessResult;
use crate::cluster::Cluster;
use crate::graph::Graph;

/// Calculate density (actual relationships / potential relationships)
pub fn calculate_density(graph: &Graph, members: &[u64]) -> f64 {
    let n = members.len() as u64;
    if n <= 1 {
        return 1.0; // By convention, singleton clusters have density 1
    }

    // Undirected graphs store both directions, so n * (n - 1) fits both cases
    let potential = n * (n - 1);
    let member_set: HashSet<u64> = members.iter().copied().collect();

    let mut actual = 0u64;
    for &node in members {
        graph.for_each_relationship(node, |_, target| {
            if target != node && member_set.contains(&target) {
                actual += 1;
            }
            true
        });
    }

    actual as f64 / potential as f64
}

/// The `top` members with the highest in- plus out-degree inside the cluster
pub fn degree_central_nodes(graph: &Graph, members: &[u64], top: usize) -> Vec<u64> {
    let mut degrees: HashMap<u64, u64> = members.iter().map(|&node| (node, 0)).collect();

    for &node in members {
        graph.for_each_relationship(node, |_, target| {
            if target != node {
                if let Some(target_degree) = degrees.get_mut(&target) {
                    *target_degree += 1;
                    if let Some(degree) = degrees.get_mut(&node) {
                        *degree += 1;
                    }
                }
            }
            true
        });
    }

    degrees
        .into_iter()
        .sorted_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
        .take(top)
        .map(|(node, _)| node)
        .collect()
}

/// Fill in the `top` members with the highest betweenness scores
pub fn attach_betweenness(cluster: &mut Cluster, betweenness: &BetweennessResult, top: usize) {
    let central = cluster
        .members
        .iter()
        .map(|&node| (node, betweenness.scores.get(node)))
        .sorted_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)))
        .take(top)
        .map(|(node, _)| node)
        .collect();
    cluster.central_nodes.betweenness = Some(central);
}

/// Aggregate statistics over a set of clusters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_count: usize,
    pub largest: usize,
    pub smallest: usize,
    pub mean_size: f64,
    pub mean_density: f64,
    pub clustered_nodes: usize,
}

pub fn summarize(clusters: &[Cluster]) -> ClusterSummary {
    if clusters.is_empty() {
        return ClusterSummary::default();
    }
    let count = clusters.len();
    let clustered_nodes: usize = clusters.iter().map(|cluster| cluster.size).sum();
    ClusterSummary {
        cluster_count: count,
        largest: clusters.iter().map(|cluster| cluster.size).max().unwrap_or(0),
        smallest: clusters.iter().map(|cluster| cluster.size).min().unwrap_or(0),
        mean_size: clustered_nodes as f64 / count as f64,
        mean_density: clusters.iter().map(|cluster| cluster.density).sum::<f64>() / count as f64,
        clustered_nodes,
    }
}
