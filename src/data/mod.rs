//! Data loading module

pub mod edge_list;

pub use edge_list::{load_graph, read_edge_list, EdgeList};
