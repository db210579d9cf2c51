// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The compiled, validated form of a pipeline manifest.

use indexmap::IndexMap;
use mediaflux_core::node::{NodeDescriptor, PipelineNode};

/// Where one outbound edge delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeTarget {
    /// Another node's inbound queue. `input` names the downstream port for
    /// multi-input targets.
    Node { id: String, input: Option<String> },
    /// The session's reply stream.
    Client,
}

/// One outbound edge of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// The producing output port.
    pub output: String,
    pub target: EdgeTarget,
}

/// One compiled node: the constructed instance plus everything the
/// scheduler needs to wire it.
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    pub instance: Box<dyn PipelineNode>,
    pub descriptor: NodeDescriptor,
    /// Bound of the inbound queue (compiler-resolved, min 1).
    pub queue_capacity: usize,
    pub edges: Vec<GraphEdge>,
    /// True when this node's outputs are forwarded to the client.
    pub is_sink: bool,
    /// Tolerant nodes downgrade per-chunk failures to reportable errors.
    pub tolerant: bool,
}

/// A compiled pipeline: a DAG of [`GraphNode`]s plus a precomputed
/// topological order for initialization and (reversed) cleanup.
pub struct ExecutableGraph {
    /// Nodes in manifest order. Iteration order is deterministic.
    pub nodes: IndexMap<String, GraphNode>,
    /// Node ids, upstream before downstream.
    pub topo_order: Vec<String>,
}

impl ExecutableGraph {
    /// Ids of all terminal sinks.
    pub fn sink_ids(&self) -> Vec<&str> {
        self.nodes.values().filter(|n| n.is_sink).map(|n| n.id.as_str()).collect()
    }

    /// A structural fingerprint for determinism checks: node ids with
    /// capacities and flags, plus every edge, in stable order.
    pub fn structure(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for node in self.nodes.values() {
            lines.push(format!(
                "node {} type={} cap={} sink={} tolerant={}",
                node.id, node.node_type, node.queue_capacity, node.is_sink, node.tolerant
            ));
            for edge in &node.edges {
                match &edge.target {
                    EdgeTarget::Node { id, input } => lines.push(format!(
                        "edge {}.{} -> {}.{}",
                        node.id,
                        edge.output,
                        id,
                        input.as_deref().unwrap_or("-")
                    )),
                    EdgeTarget::Client => {
                        lines.push(format!("edge {}.{} -> @client", node.id, edge.output));
                    },
                }
            }
        }
        lines
    }
}
