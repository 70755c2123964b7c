use anyhow::{anyhow, Context, Result};
use clap::Parser;

use compressed_graph_analyzer::algo::{betweenness, similarity, triangles};
use compressed_graph_analyzer::cluster::{self, metrics};
use compressed_graph_analyzer::config::{
    BetweennessConfig, ComponentsConfig, Config, SimilarityConfig, SimilarityMetric, TriangleCountConfig,
};
use compressed_graph_analyzer::data;
use compressed_graph_analyzer::graph::{Aggregation, Graph, Orientation, RelationshipsConfig};
use compressed_graph_analyzer::memory::{ensure_fits, AllocationTracker, GraphDimensions, MemoryRange};
use compressed_graph_analyzer::storage::{self, AnalysisResults};
use compressed_graph_analyzer::{GraphError, TerminationFlag};

#[derive(Parser, Debug)]
#[clap(
    name = "compressed-graph-analyzer",
    about = "Parallel analytics over compressed in-memory graphs"
)]
struct Cli {
    /// Path to input edge list (`source target [weight]` per line)
    #[clap(long)]
    input: String,

    /// Output directory for results
    #[clap(long, default_value = "analysis_results")]
    output_dir: String,

    /// Algorithms to run: wcc, triangles, betweenness, similarity
    #[clap(long, value_delimiter = ',', default_value = "wcc,triangles")]
    algorithms: Vec<String>,

    /// Load relationships as directed instead of undirected
    #[clap(long)]
    directed: bool,

    /// How parallel relationships are combined: none, reject, single, sum, min, max, count
    #[clap(long, default_value = "single", value_parser = parse_aggregation)]
    aggregation: Aggregation,

    /// Minimum cluster size
    #[clap(long, default_value = "3")]
    min_cluster_size: usize,

    /// Relationships per loader batch
    #[clap(long, default_value = "100000")]
    chunk_size: usize,

    /// Refuse to run steps whose estimated memory exceeds this many bytes
    #[clap(long)]
    memory_budget: Option<u64>,

    /// Skip triangles touching nodes with a higher degree
    #[clap(long)]
    max_degree: Option<u64>,

    /// Most similar nodes kept per node (10 unless --bottom-k is given)
    #[clap(long, conflicts_with = "bottom_k")]
    top_k: Option<usize>,

    /// Least similar nodes kept per node
    #[clap(long)]
    bottom_k: Option<usize>,

    /// Similar pairs kept overall
    #[clap(long)]
    top_n: Option<usize>,

    /// Lowest similarity score kept
    #[clap(long, default_value = "0.0")]
    similarity_cutoff: f64,

    /// Follow weighted shortest paths in betweenness (needs a weight column)
    #[clap(long)]
    weighted_betweenness: bool,

    /// Use overlap instead of Jaccard similarity
    #[clap(long)]
    overlap: bool,

    /// Number of worker threads (0 = use all available cores)
    #[clap(long, default_value = "0")]
    threads: usize,

    /// Verbose logging
    #[clap(long, short)]
    verbose: bool,
}

fn parse_aggregation(value: &str) -> std::result::Result<Aggregation, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(Aggregation::None),
        "reject" => Ok(Aggregation::Reject),
        "single" => Ok(Aggregation::Single),
        "sum" => Ok(Aggregation::Sum),
        "min" => Ok(Aggregation::Min),
        "max" => Ok(Aggregation::Max),
        "count" => Ok(Aggregation::Count),
        other => Err(format!("unknown aggregation '{}'", other)),
    }
}

/// Admission control against whatever the budget leaves after the loaded graph
fn admit(task: &str, estimate: MemoryRange, budget: Option<u64>, tracker: &AllocationTracker) -> Result<()> {
    if let Some(budget) = budget {
        ensure_fits(task, estimate, budget.saturating_sub(tracker.tracked()))?;
    }
    Ok(())
}

/// Skip an algorithm the graph cannot support instead of failing the whole run
fn skip_unsupported<T>(name: &str, result: compressed_graph_analyzer::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GraphError::UnsupportedGraph(reason)) => {
            log::warn!("Skipping {}: {}", name, reason);
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("{} failed", name)),
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Cli::parse();

    // Configure logging
    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    // Set number of threads
    let num_threads = if args.threads > 0 {
        args.threads
    } else {
        // If threads = 0, use all available cores
        num_cpus::get()
    };

    log::info!("Using {} worker threads", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    let config = Config::new(num_threads, args.min_cluster_size, args.chunk_size, args.memory_budget);
    config.validate()?;

    for algorithm in &args.algorithms {
        if !["wcc", "triangles", "betweenness", "similarity"].contains(&algorithm.as_str()) {
            return Err(anyhow!("unknown algorithm '{}'", algorithm));
        }
    }
    let wants = |name: &str| args.algorithms.iter().any(|algorithm| algorithm == name);

    log::info!("Starting graph analysis");
    log::info!("Input: {}", args.input);
    log::info!("Output: {}", args.output_dir);

    // 1. Load data
    let edge_list = data::read_edge_list(&args.input, 1.0)?;
    let relationships_config = RelationshipsConfig {
        orientation: if args.directed {
            Orientation::Natural
        } else {
            Orientation::Undirected
        },
        aggregation: args.aggregation,
        weighted: edge_list.weighted,
        concurrency: num_threads,
        ..RelationshipsConfig::default()
    };

    let tracker = AllocationTracker::new();
    let expected_relationships = edge_list.len() as u64 * if args.directed { 1 } else { 2 };
    // Node count is unknown before ids are collected; two per relationship bounds it
    let load_dimensions = GraphDimensions::new(expected_relationships, expected_relationships);
    admit(
        "graph loading",
        Graph::memory_estimation(&load_dimensions, edge_list.weighted),
        config.memory_budget,
        &tracker,
    )?;

    let graph = data::load_graph(&edge_list, relationships_config, config.chunk_size, tracker.clone())?;
    drop(edge_list);
    let dimensions = graph.dimensions();
    let termination = TerminationFlag::running();
    let mut results = AnalysisResults::default();

    // 2. Run algorithms
    if wants("triangles") {
        let triangle_config = TriangleCountConfig {
            concurrency: num_threads,
            max_degree: args.max_degree.unwrap_or(u64::MAX),
        };
        admit(
            "triangle counting",
            triangles::memory_estimation(&dimensions, &triangle_config),
            config.memory_budget,
            &tracker,
        )?;
        results.triangles = skip_unsupported(
            "triangle counting",
            triangles::compute(&graph, &triangle_config, &termination),
        )?;
    }

    if wants("betweenness") {
        let betweenness_config = BetweennessConfig {
            concurrency: num_threads,
            weighted: args.weighted_betweenness,
            ..BetweennessConfig::default()
        };
        admit(
            "betweenness",
            betweenness::memory_estimation(&dimensions, &betweenness_config),
            config.memory_budget,
            &tracker,
        )?;
        results.betweenness = skip_unsupported(
            "betweenness",
            betweenness::compute(&graph, &betweenness_config, &termination),
        )?;
    }

    if wants("similarity") {
        let similarity_config = SimilarityConfig {
            concurrency: num_threads,
            top_k: args.top_k,
            bottom_k: args.bottom_k,
            top_n: args.top_n,
            similarity_cutoff: args.similarity_cutoff,
            metric: if args.overlap {
                SimilarityMetric::Overlap
            } else {
                SimilarityMetric::Jaccard
            },
            ..SimilarityConfig::default()
        };
        similarity_config.validate()?;
        admit(
            "node similarity",
            similarity::memory_estimation(&dimensions, &similarity_config),
            config.memory_budget,
            &tracker,
        )?;
        results.similarity = skip_unsupported(
            "node similarity",
            similarity::compute(&graph, &similarity_config, &termination),
        )?;
    }

    if wants("wcc") {
        let components_config = ComponentsConfig {
            concurrency: num_threads,
            min_cluster_size: config.min_cluster_size,
        };
        admit(
            "connected components",
            cluster::detection::memory_estimation(&dimensions, &components_config),
            config.memory_budget,
            &tracker,
        )?;
        let components = cluster::compute(&graph, &components_config, &termination)?;
        let mut clusters = cluster::find_clusters(&graph, &components, components_config.min_cluster_size);
        if let Some(scores) = &results.betweenness {
            for found in &mut clusters {
                metrics::attach_betweenness(found, scores, 5);
            }
        }
        log::info!("Found {} clusters", clusters.len());
        results.clusters = Some(clusters);
    }

    // 3. Save results
    storage::save_results(&graph, &results, &args.output_dir)?;

    let released = graph.release();
    log::info!(
        "Analysis complete. Results saved to {} ({} bytes released)",
        args.output_dir,
        released
    );

    Ok(())
}
