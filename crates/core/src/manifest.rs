// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline manifest model.
//!
//! A [`PipelineManifest`] is the client-supplied description of a pipeline:
//! its nodes, their parameters, and the connections between them. It is
//! immutable once a session has been compiled from it; the compiler in the
//! engine crate turns it into an executable graph.

use serde::{Deserialize, Serialize};

use crate::buffer::BufferKind;
use crate::capability::CapabilityRequirements;

/// Reserved endpoint name marking an edge that delivers to the client.
pub const CLIENT_ENDPOINT: &str = "@client";

/// Conventional port names for single-input / single-output nodes.
pub const DEFAULT_INPUT: &str = "in";
pub const DEFAULT_OUTPUT: &str = "out";

/// A named input port and the buffer kinds it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct InputPort {
    pub name: String,
    pub kinds: Vec<BufferKind>,
}

impl InputPort {
    pub fn new(name: impl Into<String>, kinds: Vec<BufferKind>) -> Self {
        Self { name: name.into(), kinds }
    }

    /// The conventional single input port.
    pub fn default_port(kinds: Vec<BufferKind>) -> Self {
        Self::new(DEFAULT_INPUT, kinds)
    }
}

/// A named output port and the buffer kinds it may produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct OutputPort {
    pub name: String,
    pub kinds: Vec<BufferKind>,
}

impl OutputPort {
    pub fn new(name: impl Into<String>, kinds: Vec<BufferKind>) -> Self {
        Self { name: name.into(), kinds }
    }

    /// The conventional single output port.
    pub fn default_port(kinds: Vec<BufferKind>) -> Self {
        Self::new(DEFAULT_OUTPUT, kinds)
    }
}

/// One node entry in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeManifest {
    /// Unique node id within the pipeline.
    pub id: String,

    /// Node type, a key into the runtime's node registry.
    pub node_type: String,

    /// Opaque parameters handed to the node's constructor.
    #[serde(default)]
    pub params: serde_json::Value,

    /// Whether `process` may emit more than one output per chunk.
    #[serde(default)]
    pub is_streaming: bool,

    /// Declared input ports. May be empty, in which case the registry's
    /// descriptor for the constructed node is authoritative.
    #[serde(default)]
    pub input_kinds: Vec<InputPort>,

    /// Declared output ports. Same defaulting rule as `input_kinds`.
    #[serde(default)]
    pub output_kinds: Vec<OutputPort>,

    /// Requirements checked by the capability gate at admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_requirements: Option<CapabilityRequirements>,

    /// A tolerant node downgrades per-chunk processing errors from fatal to
    /// reportable: the chunk is dropped with notice and the session
    /// continues.
    #[serde(default)]
    pub tolerant: bool,
}

/// A directed edge between two nodes, or from a node to the client.
///
/// Port names are only needed for multi-output / multi-input nodes; for
/// single-port nodes they resolve implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_output: Option<String>,
    pub to_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_input: Option<String>,
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from_node: from.into(), from_output: None, to_node: to.into(), to_input: None }
    }

    /// Whether this edge delivers to the client rather than another node.
    pub fn is_client_edge(&self) -> bool {
        self.to_node == CLIENT_ENDPOINT
    }
}

/// Pipeline metadata, advisory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// The client-supplied description of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineManifest {
    pub protocol_version: String,
    #[serde(default)]
    pub metadata: ManifestMetadata,
    pub nodes: Vec<NodeManifest>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl PipelineManifest {
    /// Look up a node entry by id.
    pub fn node(&self, id: &str) -> Option<&NodeManifest> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let json = r#"{
            "protocol_version": "v1",
            "metadata": { "name": "calc" },
            "nodes": [
                { "id": "c", "node_type": "calculator", "params": {"op": "add", "value": 5} }
            ],
            "connections": []
        }"#;

        let manifest: PipelineManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.protocol_version, "v1");
        assert_eq!(manifest.nodes.len(), 1);
        assert!(!manifest.nodes[0].is_streaming);
        assert!(!manifest.nodes[0].tolerant);
        assert_eq!(manifest.nodes[0].params["op"], "add");
    }

    #[test]
    fn test_client_edge() {
        let conn = Connection::new("tts", "@client");
        assert!(conn.is_client_edge());
        assert!(!Connection::new("a", "b").is_client_edge());
    }

    #[test]
    fn test_connection_port_names_optional() {
        let json = r#"{"from_node": "sync", "from_output": "report", "to_node": "@client"}"#;
        let conn: Connection = serde_json::from_str(json).unwrap();
        assert_eq!(conn.from_output.as_deref(), Some("report"));
        assert!(conn.to_input.is_none());
    }
}
