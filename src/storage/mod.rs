//! Results persistence module
//!
//! Dense ids never leave the process: every node written here is mapped back
//! to its original id first.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

use crate::algo::{BetweennessResult, SimilarityResult, TriangleCountResult};
use crate::cluster::metrics::summarize;
use crate::cluster::Cluster;
use crate::graph::Graph;

/// Everything one analysis run produced
#[derive(Debug, Default)]
pub struct AnalysisResults {
    pub triangles: Option<TriangleCountResult>,
    pub betweenness: Option<BetweennessResult>,
    pub similarity: Option<SimilarityResult>,
    pub clusters: Option<Vec<Cluster>>,
}

/// Save analysis results to the specified directory
pub fn save_results(graph: &Graph, results: &AnalysisResults, output_dir: impl AsRef<Path>) -> Result<()> {
    let output_dir = output_dir.as_ref();
    log::info!("Saving results to {}", output_dir.display());

    // Ensure output directory exists
    fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create output directory {}", output_dir.display()))?;

    save_summary(graph, results, output_dir)?;
    save_graph_stats(graph, output_dir)?;
    if let Some(triangles) = &results.triangles {
        save_triangles(graph, triangles, output_dir)?;
    }
    if let Some(betweenness) = &results.betweenness {
        save_betweenness(graph, betweenness, output_dir)?;
    }
    if let Some(similarity) = &results.similarity {
        save_similarity(graph, similarity, output_dir)?;
    }
    if let Some(clusters) = &results.clusters {
        save_clusters(graph, clusters, output_dir)?;
    }

    log::info!("Results saved successfully");
    Ok(())
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("cannot write {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn original_ids(graph: &Graph, nodes: &[u64]) -> Vec<u64> {
    nodes.iter().map(|&node| graph.to_original(node)).collect()
}

/// Save summary information
fn save_summary(graph: &Graph, results: &AnalysisResults, output_dir: &Path) -> Result<()> {
    log::info!("Saving summary information");

    let node_count = graph.node_count();
    let mut summary = json!({
        "graph_stats": {
            "node_count": node_count,
            "relationship_count": graph.relationship_count(),
            "undirected": graph.is_undirected(),
            "multi_graph": graph.is_multi_graph(),
            "avg_degree": if node_count == 0 { 0.0 } else { graph.relationship_count() as f64 / node_count as f64 },
            "size_in_bytes": graph.size_of_bytes(),
        }
    });

    if let Some(triangles) = &results.triangles {
        summary["triangles"] = json!({
            "global_triangles": triangles.global_triangles,
            "average_clustering": triangles.average_clustering,
            "terminated": triangles.terminated,
            "compute_millis": triangles.compute_millis,
        });
    }
    if let Some(betweenness) = &results.betweenness {
        summary["betweenness"] = json!({
            "min": betweenness.min(),
            "max": betweenness.max(),
            "mean": betweenness.mean(),
            "terminated": betweenness.terminated,
            "compute_millis": betweenness.compute_millis,
        });
    }
    if let Some(similarity) = &results.similarity {
        summary["similarity"] = json!({
            "nodes_compared": similarity.nodes_compared,
            "comparisons": similarity.comparisons,
            "pairs": similarity.pair_count(),
            "terminated": similarity.terminated,
            "compute_millis": similarity.compute_millis,
        });
    }
    if let Some(clusters) = &results.clusters {
        summary["cluster_stats"] = serde_json::to_value(summarize(clusters))?;
    }

    write_json(&output_dir.join("summary.json"), &summary)
}

/// Save graph statistics
fn save_graph_stats(graph: &Graph, output_dir: &Path) -> Result<()> {
    log::info!("Saving graph statistics");

    // 0-100+ buckets
    let mut degree_dist = vec![0u64; 101];
    for node in 0..graph.node_count() {
        degree_dist[graph.degree(node).min(100)] += 1;
    }

    let stats = json!({
        "node_count": graph.node_count(),
        "relationship_count": graph.relationship_count(),
        "max_degree": graph.max_degree(),
        "relationship_types": graph.relationship_types().collect::<Vec<_>>(),
        "degree_distribution": degree_dist,
    });
    write_json(&output_dir.join("graph_stats.json"), &stats)
}

fn save_triangles(graph: &Graph, triangles: &TriangleCountResult, output_dir: &Path) -> Result<()> {
    log::info!("Saving triangle counts");

    let nodes: Vec<Value> = (0..graph.node_count())
        .map(|node| {
            json!({
                "node": graph.to_original(node),
                "triangles": triangles.local_triangles.get(node),
                "clustering": triangles.local_clustering.get(node),
            })
        })
        .collect();
    let output = json!({
        "global_triangles": triangles.global_triangles,
        "average_clustering": triangles.average_clustering,
        "terminated": triangles.terminated,
        "nodes": nodes,
    });
    write_json(&output_dir.join("triangles.json"), &output)
}

fn save_betweenness(graph: &Graph, betweenness: &BetweennessResult, output_dir: &Path) -> Result<()> {
    log::info!("Saving betweenness scores");

    let nodes: Vec<Value> = (0..graph.node_count())
        .map(|node| json!({ "node": graph.to_original(node), "score": betweenness.scores.get(node) }))
        .collect();
    let output = json!({ "terminated": betweenness.terminated, "nodes": nodes });
    write_json(&output_dir.join("betweenness.json"), &output)
}

fn save_similarity(graph: &Graph, similarity: &SimilarityResult, output_dir: &Path) -> Result<()> {
    log::info!("Saving {} similarity pairs", similarity.pair_count());

    let pairs: Vec<Value> = similarity
        .stream()
        .map(|pair| {
            json!({
                "node1": graph.to_original(pair.node1),
                "node2": graph.to_original(pair.node2),
                "similarity": pair.similarity,
            })
        })
        .collect();
    let output = json!({ "terminated": similarity.terminated, "pairs": pairs });
    write_json(&output_dir.join("similarity.json"), &output)
}

/// Save individual cluster information
fn save_clusters(graph: &Graph, clusters: &[Cluster], output_dir: &Path) -> Result<()> {
    log::info!("Saving {} clusters", clusters.len());

    let clusters_dir = output_dir.join("clusters");
    fs::create_dir_all(&clusters_dir)?;

    for cluster in clusters {
        let cluster_json = json!({
            "id": cluster.id,
            "representative": graph.to_original(cluster.representative),
            "size": cluster.size,
            "density": cluster.density,
            "central_nodes": {
                "degree": original_ids(graph, &cluster.central_nodes.degree),
                "betweenness": cluster.central_nodes.betweenness.as_ref().map(|nodes| original_ids(graph, nodes)),
            },
            "members": original_ids(graph, &cluster.members),
        });
        write_json(&clusters_dir.join(format!("cluster_{}.json", cluster.id)), &cluster_json)?;
    }

    let clusters_json = json!({
        "clusters": clusters.iter().map(|cluster| {
            json!({
                "id": cluster.id,
                "size": cluster.size,
                "density": cluster.density,
                "central_nodes_count": cluster.central_nodes.degree.len()
            })
        }).collect::<Vec<_>>()
    });
    write_json(&output_dir.join("all_clusters.json"), &clusters_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::triangles;
    use crate::config::TriangleCountConfig;
    use crate::graph::{Aggregation, Orientation, RelationshipsConfig};
    use crate::parallel::TerminationFlag;

    #[test]
    fn test_writes_original_ids() {
        let graph = Graph::from_edges(
            &[(10, 20), (20, 30), (30, 10)],
            RelationshipsConfig {
                orientation: Orientation::Undirected,
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();
        let results = AnalysisResults {
            triangles: Some(triangles::compute(&graph, &TriangleCountConfig::default(), &TerminationFlag::running()).unwrap()),
            ..AnalysisResults::default()
        };

        let dir = tempfile::tempdir().unwrap();
        save_results(&graph, &results, dir.path()).unwrap();

        let summary: Value = serde_json::from_str(&fs::read_to_string(dir.path().join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["graph_stats"]["node_count"], 3);
        assert_eq!(summary["triangles"]["global_triangles"], 1);

        let written: Value = serde_json::from_str(&fs::read_to_string(dir.path().join("triangles.json")).unwrap()).unwrap();
        assert_eq!(written["nodes"][2]["node"], 30);
        assert_eq!(written["nodes"][2]["triangles"], 1);
        assert!(!dir.path().join("clusters").exists());
    }
}
