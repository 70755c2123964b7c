//! Configuration management for the graph analytics engine
//!
//! Every algorithm takes a plain value struct. Structs deserialize from JSON
//! with missing fields taken from `Default`, and `validate` rejects invalid
//! combinations before any work starts.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

fn check_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        return Err(GraphError::Configuration(
            "concurrency must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn check_positive(name: &str, value: Option<usize>) -> Result<()> {
    match value {
        Some(0) => Err(GraphError::Configuration(format!("{} must be positive", name))),
        _ => Ok(()),
    }
}

/// Engine-wide settings used by the command line front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker threads for loading and algorithms
    pub concurrency: usize,

    /// Minimum number of members for a reported cluster
    pub min_cluster_size: usize,

    /// Relationships buffered per loader batch
    pub chunk_size: usize,

    /// Refuse work whose estimated memory exceeds this many bytes
    pub memory_budget: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            min_cluster_size: 3,
            chunk_size: 100_000,
            memory_budget: None,
        }
    }
}

impl Config {
    /// Create a new configuration with custom values
    pub fn new(concurrency: usize, min_cluster_size: usize, chunk_size: usize, memory_budget: Option<u64>) -> Self {
        Self {
            concurrency,
            min_cluster_size,
            chunk_size,
            memory_budget,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_concurrency(self.concurrency)?;
        if self.chunk_size == 0 {
            return Err(GraphError::Configuration(
                "chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for triangle counting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangleCountConfig {
    pub concurrency: usize,

    /// Nodes with a higher degree take part in no triangle
    pub max_degree: u64,
}

impl Default for TriangleCountConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            max_degree: u64::MAX,
        }
    }
}

impl TriangleCountConfig {
    pub fn validate(&self) -> Result<()> {
        check_concurrency(self.concurrency)
    }
}

/// Settings for betweenness centrality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BetweennessConfig {
    pub concurrency: usize,

    /// Source nodes a worker pulls from the shared counter at once
    pub batch_size: u64,

    /// Follow shortest paths by relationship weight instead of hop count
    pub weighted: bool,
}

impl Default for BetweennessConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            batch_size: 1,
            weighted: false,
        }
    }
}

impl BetweennessConfig {
    pub fn validate(&self) -> Result<()> {
        check_concurrency(self.concurrency)?;
        if self.batch_size == 0 {
            return Err(GraphError::Configuration(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Set similarity measure between two neighbor sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimilarityMetric {
    /// `|A ∩ B| / |A ∪ B|`
    #[default]
    Jaccard,
    /// `|A ∩ B| / min(|A|, |B|)`
    Overlap,
}

impl SimilarityMetric {
    /// Score of two sets with the given sizes and intersection size
    #[inline]
    pub fn score(self, left: usize, right: usize, intersection: usize) -> f64 {
        let denominator = match self {
            SimilarityMetric::Jaccard => left + right - intersection,
            SimilarityMetric::Overlap => left.min(right),
        };
        if denominator == 0 {
            0.0
        } else {
            intersection as f64 / denominator as f64
        }
    }
}

/// Per-node partners kept when no per-node bound is configured
pub const DEFAULT_TOP_K: usize = 10;

/// Settings for bounded pairwise node similarity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub concurrency: usize,

    /// Scores below this value are dropped
    pub similarity_cutoff: f64,

    /// Nodes with fewer neighbors are neither compared nor reported
    pub degree_cutoff: usize,

    /// Keep the `top_k` most similar nodes per node, [`DEFAULT_TOP_K`] when
    /// neither `top_k` nor `bottom_k` is set
    pub top_k: Option<usize>,

    /// Keep the `bottom_k` least similar nodes per node
    pub bottom_k: Option<usize>,

    /// Keep only the `top_n` best pairs overall
    pub top_n: Option<usize>,

    /// Keep only the `bottom_n` worst pairs overall
    pub bottom_n: Option<usize>,

    pub metric: SimilarityMetric,

    /// Nodes a worker pulls from the shared counter at once
    pub batch_size: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            similarity_cutoff: 1e-42,
            degree_cutoff: 1,
            top_k: None,
            bottom_k: None,
            top_n: None,
            bottom_n: None,
            metric: SimilarityMetric::Jaccard,
            batch_size: 64,
        }
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> Result<()> {
        check_concurrency(self.concurrency)?;
        if self.top_k.is_some() && self.bottom_k.is_some() {
            return Err(GraphError::Configuration(
                "top_k and bottom_k are mutually exclusive".to_string(),
            ));
        }
        if self.top_n.is_some() && self.bottom_n.is_some() {
            return Err(GraphError::Configuration(
                "top_n and bottom_n are mutually exclusive".to_string(),
            ));
        }
        check_positive("top_k", self.top_k)?;
        check_positive("bottom_k", self.bottom_k)?;
        check_positive("top_n", self.top_n)?;
        check_positive("bottom_n", self.bottom_n)?;
        if self.degree_cutoff == 0 {
            return Err(GraphError::Configuration(
                "degree_cutoff must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_cutoff) {
            return Err(GraphError::Configuration(format!(
                "similarity_cutoff must lie in [0, 1], got {}",
                self.similarity_cutoff
            )));
        }
        if self.batch_size == 0 {
            return Err(GraphError::Configuration(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-node queue capacity and whether it keeps the largest scores
    pub fn per_node_bound(&self) -> (usize, bool) {
        match (self.top_k, self.bottom_k) {
            (_, Some(bottom)) => (bottom, false),
            (top, None) => (top.unwrap_or(DEFAULT_TOP_K), true),
        }
    }

    /// Global queue capacity and whether it keeps the largest scores
    pub fn global_bound(&self) -> Option<(usize, bool)> {
        match (self.top_n, self.bottom_n) {
            (Some(top), _) => Some((top, true)),
            (None, Some(bottom)) => Some((bottom, false)),
            (None, None) => None,
        }
    }
}

/// Settings for weakly connected components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentsConfig {
    pub concurrency: usize,

    /// Components smaller than this are not materialized as clusters
    pub min_cluster_size: usize,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            min_cluster_size: 3,
        }
    }
}

impl ComponentsConfig {
    pub fn validate(&self) -> Result<()> {
        check_concurrency(self.concurrency)
    }
}
