//! Serialisable adjacency view of a graph, for offline inspection of what the
//! pass built. Node ids are arena indices, stable within one function;
//! `null` children mark edges to the function exit.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::graph::Graph;

#[derive(Debug, Serialize)]
pub struct AdjacencyNode {
    #[serde(rename = "isEntry")]
    pub is_entry: bool,
    #[serde(rename = "isLoopHead")]
    pub is_loop_head: bool,
    pub weight: u64,
    pub children: Vec<Option<usize>>,
}

#[derive(Debug, Serialize)]
pub struct AdjacencyGraph {
    #[serde(rename = "funcName")]
    pub func_name: String,
    pub nodes: BTreeMap<usize, AdjacencyNode>,
}

impl AdjacencyGraph {
    /// Collects every block reachable from the graph head.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut nodes = BTreeMap::new();
        for id in graph.reachable() {
            let block = &graph[id];
            nodes.insert(
                id.index(),
                AdjacencyNode {
                    is_entry: Some(id) == graph.head,
                    is_loop_head: block.is_loop_head,
                    weight: block.weight,
                    children: block
                        .children
                        .iter()
                        .map(|edge| edge.target.map(|t| t.index()))
                        .collect(),
                },
            );
        }
        AdjacencyGraph {
            func_name: graph.func_name.clone(),
            nodes,
        }
    }
}

/// The `{"graphs": [...]}` document written by the diagnostic command.
pub fn graphs_to_json(graphs: &[Graph]) -> serde_json::Value {
    let adjacency: Vec<AdjacencyGraph> =
        graphs.iter().map(AdjacencyGraph::from_graph).collect();
    serde_json::json!({ "graphs": adjacency })
}
