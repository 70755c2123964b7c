//! Core library functions for the compressed graph analyzer
//!
//! Graphs are loaded into delta/varint compressed adjacency lists addressed
//! by dense node ids and analysed by parallel algorithms running on a fixed
//! worker pool.

pub mod algo;
pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod memory;
pub mod parallel;
pub mod queue;
pub mod storage;

pub use error::{GraphError, Result};
pub use graph::Graph;
pub use parallel::TerminationFlag;
