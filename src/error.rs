//! Error taxonomy for the graph engine core

use thiserror::Error;

/// Errors raised by graph construction and algorithm execution.
///
/// Cancellation is not represented here: a terminated computation returns a
/// partial result flagged as `terminated`.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Mutually exclusive or out-of-range configuration values
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The graph does not have the shape an algorithm requires
    #[error("unsupported graph: {0}")]
    UnsupportedGraph(String),

    /// A parallel relationship was found while aggregation rejects duplicates
    #[error("duplicate relationship ({0})-->({1}) is not allowed by aggregation REJECT")]
    DuplicateRelationship(u64, u64),

    /// An original node id that the id map does not know
    #[error("unknown node id {0}")]
    UnknownNode(u64),

    /// Admission control refused to start a task
    #[error("{task} requires up to {required} bytes but only {available} bytes are available")]
    ResourceExhaustion {
        task: String,
        required: u64,
        available: u64,
    },

    /// A worker panicked; raised after all workers have been joined
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used across the core
pub type Result<T> = std::result::Result<T, GraphError>;
