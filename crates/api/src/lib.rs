// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The streaming session protocol: one bidirectional stream of JSON
//! messages per session.
//!
//! Client → server: [`ClientMessage`] — an `Init` carrying the manifest,
//! then any number of chunks and control messages.
//! Server → client: [`ServerMessage`] — exactly one `Ready` (or an `Error`
//! when the manifest is rejected), zero or more `Result`s and non-fatal
//! `Error`s, and exactly one terminal `Closed`.
//!
//! Binary payloads inside buffers ride as base64; everything else is plain
//! JSON. The unary sibling reuses the same vocabulary over a single
//! request/response exchange.

use mediaflux_core::chunk::{ChunkResult, DataChunk};
use mediaflux_core::error::{ErrorKind, FluxError};
use mediaflux_core::manifest::PipelineManifest;
use serde::{Deserialize, Serialize};

/// Optional per-session resource limits a client may request at `Init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Cap on any node's inbound queue depth, overriding the server
    /// default downward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_depth: Option<usize>,
    /// Advisory memory ceiling for the session's nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,
}

/// The only control command: an orderly close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Close,
}

/// Client → server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on the stream.
    Init {
        manifest: PipelineManifest,
        client_version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_limits: Option<ResourceLimits>,
    },
    /// One routed unit, any time after `Ready`.
    Chunk(DataChunk),
    Control {
        command: ControlCommand,
    },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Normal,
    Error,
}

/// The error surface of the protocol: taxonomy kind, human-readable
/// message, whether the client can fix and retry, and the node at fault
/// when there is one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_node_id: Option<String>,
}

impl From<&FluxError> for ErrorPayload {
    fn from(error: &FluxError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            recoverable: error.recoverable(),
            failing_node_id: error.failing_node_id().map(ToString::to_string),
        }
    }
}

/// Server → client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Exactly once, after a successful compile.
    Ready { session_id: String },
    /// One tagged output of a sink node.
    Result(ChunkResult),
    /// Fatal errors are followed by `Closed { error }`; non-fatal ones
    /// (tolerant nodes, rejected chunks) leave the session running.
    Error(ErrorPayload),
    /// Exactly once, last message on every session.
    Closed { reason: CloseReason },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mediaflux_core::Buffer;

    #[test]
    fn test_init_wire_shape() {
        let json = r#"{
            "type": "init",
            "manifest": {
                "protocol_version": "v1",
                "nodes": [{"id": "c", "node_type": "core::calculator",
                           "params": {"op": "add", "value": 5}}],
                "connections": []
            },
            "client_version": "0.1.0"
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Init { manifest, client_version, resource_limits } => {
                assert_eq!(manifest.nodes.len(), 1);
                assert_eq!(client_version, "0.1.0");
                assert!(resource_limits.is_none());
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chunk_round_trip() {
        let chunk = DataChunk::single("c", Buffer::json(&serde_json::json!({"value": 10})).unwrap(), 0);
        let msg = ClientMessage::Chunk(chunk);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"chunk\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ClientMessage::Chunk(c) if c.target_node_id == "c"));
    }

    #[test]
    fn test_error_payload_from_flux_error() {
        let error = FluxError::node("n2", "inference exploded");
        let payload = ErrorPayload::from(&error);
        assert_eq!(payload.kind, ErrorKind::NodeExecution);
        assert!(!payload.recoverable);
        assert_eq!(payload.failing_node_id.as_deref(), Some("n2"));
    }

    #[test]
    fn test_closed_serialization() {
        let json = serde_json::to_string(&ServerMessage::Closed { reason: CloseReason::Error })
            .unwrap();
        assert_eq!(json, r#"{"type":"closed","reason":"error"}"#);
    }
}
