//! Triangle enumeration over sorted adjacency cursors

use crate::graph::cursor::{GraphCursor, NeighborCursor, NOT_FOUND};
use crate::graph::Graph;

/// Finds every triangle `a < b < c` exactly once, from its smallest node.
///
/// Holds three reusable cursors, so every worker needs its own instance.
/// Obtain one through [`Graph::intersection`], which checks that the graph is
/// undirected and free of parallel relationships.
#[derive(Debug)]
pub struct RelationshipIntersect<'g> {
    graph: &'g Graph,
    max_degree: u64,
    outer: GraphCursor<'g>,
    inner_a: GraphCursor<'g>,
    inner_b: GraphCursor<'g>,
}

impl<'g> RelationshipIntersect<'g> {
    pub(crate) fn new(graph: &'g Graph, max_degree: u64) -> Self {
        Self {
            graph,
            max_degree,
            outer: graph.raw_cursor(),
            inner_a: graph.raw_cursor(),
            inner_b: graph.raw_cursor(),
        }
    }

    #[inline]
    fn admits(&self, node: u64) -> bool {
        self.graph.degree(node) as u64 <= self.max_degree
    }

    /// Call `consumer(a, b, c)` for each triangle whose smallest node is `a`.
    ///
    /// Triangles touching a node with degree above `max_degree` are skipped.
    pub fn intersect_all(&mut self, a: u64, mut consumer: impl FnMut(u64, u64, u64)) {
        if !self.admits(a) {
            return;
        }

        self.outer.init(a);
        let mut b = self.outer.skip_until(a);
        while b != NOT_FOUND {
            if self.admits(b) {
                self.inner_a.init(a);
                self.inner_b.init(b);
                let mut from_a = self.inner_a.skip_until(b);
                let mut from_b = self.inner_b.skip_until(b);

                while from_a != NOT_FOUND && from_b != NOT_FOUND {
                    if from_a == from_b {
                        if self.admits(from_a) {
                            consumer(a, b, from_a);
                        }
                        from_a = self.inner_a.next_v();
                        from_b = self.inner_b.next_v();
                    } else if from_a < from_b {
                        from_a = self.inner_a.advance(from_b);
                    } else {
                        from_b = self.inner_b.advance(from_a);
                    }
                }
            }
            b = self.outer.next_v();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{Aggregation, Graph, Orientation, RelationshipsConfig};

    fn undirected(edges: &[(u64, u64)]) -> Graph {
        Graph::from_edges(
            edges,
            RelationshipsConfig {
                orientation: Orientation::Undirected,
                aggregation: Aggregation::Single,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap()
    }

    fn triangles(graph: &Graph, max_degree: u64) -> Vec<(u64, u64, u64)> {
        let mut intersect = graph.intersection(max_degree).unwrap();
        let mut found = Vec::new();
        for node in 0..graph.node_count() {
            intersect.intersect_all(node, |a, b, c| found.push((a, b, c)));
        }
        found
    }

    #[test]
    fn test_each_triangle_once() {
        let graph = undirected(&[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3), (4, 5)]);
        assert_eq!(
            triangles(&graph, u64::MAX),
            vec![(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)]
        );
    }

    #[test]
    fn test_self_loops_do_not_form_triangles() {
        let graph = undirected(&[(0, 0), (0, 1), (1, 1), (1, 2), (0, 2)]);
        assert_eq!(triangles(&graph, u64::MAX), vec![(0, 1, 2)]);
    }

    #[test]
    fn test_max_degree_skips_hubs() {
        // Node 0 joins both triangles and has degree 4
        let graph = undirected(&[(0, 1), (1, 2), (0, 2), (0, 3), (3, 4), (0, 4)]);
        assert_eq!(triangles(&graph, u64::MAX).len(), 2);
        assert!(triangles(&graph, 3).is_empty());
    }

    #[test]
    fn test_multigraph_is_rejected() {
        let graph = Graph::from_edges(
            &[(0, 1), (1, 0)],
            RelationshipsConfig {
                orientation: Orientation::Undirected,
                ..RelationshipsConfig::default()
            },
        )
        .unwrap();
        assert!(graph.is_multi_graph());
        assert!(graph.intersection(u64::MAX).is_err());
    }
}
