//! Edge list file handling for graph data
//!
//! One relationship per line: `source target [weight]`, separated by
//! whitespace or commas. Blank lines and lines starting with `#` or `%` are
//! skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;

use crate::graph::{Graph, GraphBuilder, IdMapBuilder, RelationshipsConfig};
use crate::memory::AllocationTracker;

/// Parsed relationships with their original ids
#[derive(Debug, Clone, Default)]
pub struct EdgeList {
    pub edges: Vec<(u64, u64, f64)>,

    /// Whether any line carried an explicit weight
    pub weighted: bool,
}

impl EdgeList {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

fn parse_line(line: &str, number: usize) -> Result<Option<(u64, u64, Option<f64>)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
        return Ok(None);
    }

    let fields: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|field| !field.is_empty())
        .collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(anyhow!(
            "line {}: expected `source target [weight]`, found {} fields",
            number,
            fields.len()
        ));
    }

    let source = fields[0]
        .parse::<u64>()
        .with_context(|| format!("line {}: invalid source id '{}'", number, fields[0]))?;
    let target = fields[1]
        .parse::<u64>()
        .with_context(|| format!("line {}: invalid target id '{}'", number, fields[1]))?;
    let weight = match fields.get(2) {
        Some(field) => Some(
            field
                .parse::<f64>()
                .with_context(|| format!("line {}: invalid weight '{}'", number, field))?,
        ),
        None => None,
    };
    Ok(Some((source, target, weight)))
}

/// Read and parse an edge list file, filling in `default_weight` where a line has none
pub fn read_edge_list(path: impl AsRef<Path>, default_weight: f64) -> Result<EdgeList> {
    let path = path.as_ref();
    log::info!("Reading edge list: {}", path.display());

    if !path.exists() {
        return Err(anyhow!("File not found: {}", path.display()));
    }
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("cannot read {}", path.display()))?;

    // Parse in parallel; line numbers are 1-based for error messages
    let parsed: Vec<(u64, u64, Option<f64>)> = lines
        .par_iter()
        .enumerate()
        .map(|(index, line)| parse_line(line, index + 1))
        .filter_map(|result| result.transpose())
        .collect::<Result<_>>()?;

    let weighted = parsed.iter().any(|(_, _, weight)| weight.is_some());
    let edges: Vec<(u64, u64, f64)> = parsed
        .into_iter()
        .map(|(source, target, weight)| (source, target, weight.unwrap_or(default_weight)))
        .collect();

    log::info!("Loaded {} relationships{}", edges.len(), if weighted { " with weights" } else { "" });
    Ok(EdgeList { edges, weighted })
}

/// Build a graph from parsed relationships, ingesting `chunk_size` relationships per batch
pub fn load_graph(
    edge_list: &EdgeList,
    config: RelationshipsConfig,
    chunk_size: usize,
    tracker: AllocationTracker,
) -> Result<Graph> {
    // Collect ids concurrently
    let ids = IdMapBuilder::with_capacity(edge_list.len());
    edge_list.edges.par_iter().for_each(|&(source, target, _)| {
        ids.add_node(source);
        ids.add_node(target);
    });
    let id_map = ids.build();
    log::info!("Found {} distinct nodes", id_map.node_count());

    let mut builder = GraphBuilder::new(id_map).with_tracker(tracker);
    let relationships = {
        let relationships = builder.relationships(config);
        edge_list
            .edges
            .par_chunks(chunk_size.max(1))
            .try_for_each(|chunk| -> Result<()> {
                let mut batch = relationships.batch();
                for &(source, target, weight) in chunk {
                    batch.add_weighted(source, target, weight)?;
                }
                Ok(())
            })?;
        relationships.build().context("building relationships")?
    };
    builder.add_relationship_type("REL", relationships);
    let graph = builder.build()?;

    log::info!(
        "Loaded graph with {} nodes and {} relationships",
        graph.node_count(),
        graph.relationship_count()
    );
    Ok(graph)
}
