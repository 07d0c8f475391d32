// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Read-only view of the computation graph needed for provider dispatch.
//!
//! The graph itself lives outside this crate. Dispatch only needs to find a
//! node by index and read the provider id placement assigned to it.

use petgraph::graph::IndexType;
use petgraph::EdgeType;

pub type NodeIndex = usize;

/// A graph node annotated with the provider that will execute it.
pub trait NodeView {
    fn execution_provider_type(&self) -> &str;
}

/// Lookup of nodes by index.
pub trait GraphView {
    type Node: NodeView;

    fn node(&self, index: NodeIndex) -> Option<&Self::Node>;
}

impl<N, E, Ty, Ix> GraphView for petgraph::Graph<N, E, Ty, Ix>
where
    N: NodeView,
    Ty: EdgeType,
    Ix: IndexType,
{
    type Node = N;

    fn node(&self, index: NodeIndex) -> Option<&N> {
        if index >= <Ix as IndexType>::max().index() {
            return None;
        }
        self.node_weight(petgraph::graph::NodeIndex::new(index))
    }
}

/// A bare provider id is a valid node annotation on its own.
impl NodeView for String {
    fn execution_provider_type(&self) -> &str {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_petgraph_node_lookup() {
        let mut graph: petgraph::Graph<String, ()> = petgraph::Graph::new();
        let a = graph.add_node("CPU".to_string());
        let b = graph.add_node("ACCEL".to_string());
        graph.add_edge(a, b, ());

        assert_eq!(graph.node(a.index()).unwrap().execution_provider_type(), "CPU");
        assert_eq!(graph.node(b.index()).unwrap().execution_provider_type(), "ACCEL");
        assert!(graph.node(2).is_none());
    }

    #[test]
    fn test_out_of_range_index_for_narrow_index_type() {
        let mut graph: petgraph::Graph<String, (), petgraph::Directed, u8> =
            petgraph::Graph::default();
        graph.add_node("CPU".to_string());
        assert!(graph.node(1_000).is_none());
    }
}
