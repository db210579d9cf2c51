// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The routed unit on the scheduler's data path.
//!
//! A [`DataChunk`] is addressed to one node by id and carries either a
//! single [`Buffer`] or a named set of buffers that jointly satisfies a
//! multi-input node. [`ChunkResult`] is the tagged output a sink forwards
//! back to the client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::buffer::{Buffer, BufferKind};

/// The payload of a chunk: one buffer, or all required inputs of a
/// multi-input node carried jointly (e.g. `{audio, video}` for a
/// synchronized node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkPayload {
    Single { buffer: Buffer },
    Named { named_buffers: HashMap<String, Buffer> },
}

impl ChunkPayload {
    /// The buffer for a given input name.
    ///
    /// A `Single` payload answers any name; a `Named` payload answers only
    /// its own keys.
    pub fn buffer_for(&self, input: &str) -> Option<&Buffer> {
        match self {
            Self::Single { buffer } => Some(buffer),
            Self::Named { named_buffers } => named_buffers.get(input),
        }
    }

    /// Names missing from this payload, given the declared inputs.
    pub fn missing_inputs<'a>(&self, declared: &'a [String]) -> Vec<&'a str> {
        match self {
            Self::Single { .. } => {
                if declared.len() <= 1 {
                    Vec::new()
                } else {
                    declared.iter().skip(1).map(String::as_str).collect()
                }
            },
            Self::Named { named_buffers } => declared
                .iter()
                .filter(|name| !named_buffers.contains_key(*name))
                .map(String::as_str)
                .collect(),
        }
    }

    /// Kinds carried by this payload, in arbitrary order.
    pub fn kinds(&self) -> Vec<BufferKind> {
        match self {
            Self::Single { buffer } => vec![buffer.kind()],
            Self::Named { named_buffers } => named_buffers.values().map(Buffer::kind).collect(),
        }
    }

    /// Validate every contained buffer's structural invariants.
    ///
    /// # Errors
    ///
    /// Propagates the first buffer validation failure.
    pub fn validate(&self) -> Result<(), crate::error::FluxError> {
        match self {
            Self::Single { buffer } => buffer.validate(),
            Self::Named { named_buffers } => {
                for buffer in named_buffers.values() {
                    buffer.validate()?;
                }
                Ok(())
            },
        }
    }
}

/// One routed unit on the data path, addressed to a node by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChunk {
    /// The node this chunk is addressed to.
    pub target_node_id: String,
    #[serde(flatten)]
    pub payload: ChunkPayload,
    /// Monotonically non-decreasing per `(session, target_node_id)`.
    pub sequence: u64,
    /// Client wall clock, advisory only.
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl DataChunk {
    /// A single-buffer chunk.
    pub fn single(target: impl Into<String>, buffer: Buffer, sequence: u64) -> Self {
        Self {
            target_node_id: target.into(),
            payload: ChunkPayload::Single { buffer },
            sequence,
            timestamp_ms: 0,
        }
    }

    /// A multi-input chunk carrying all named inputs jointly.
    pub fn named(
        target: impl Into<String>,
        named_buffers: HashMap<String, Buffer>,
        sequence: u64,
    ) -> Self {
        Self {
            target_node_id: target.into(),
            payload: ChunkPayload::Named { named_buffers },
            sequence,
            timestamp_ms: 0,
        }
    }
}

/// A tagged output delivered to the client, in the producing node's output
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// The node that produced this output.
    #[serde(rename = "target_node_id")]
    pub node_id: String,
    #[serde(flatten)]
    pub payload: ChunkPayload,
    /// Sequence of the client chunk this output derives from.
    pub sequence: u64,
    /// Wall-clock time spent inside the producing node for this chunk so
    /// far, at the moment this output was emitted.
    pub processing_time_ms: f64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_payload_covers_single_input() {
        let chunk = DataChunk::single("resample", Buffer::text("x"), 0);
        let declared = vec!["in".to_string()];
        assert!(chunk.payload.missing_inputs(&declared).is_empty());
    }

    #[test]
    fn test_named_payload_coverage() {
        let mut buffers = HashMap::new();
        buffers.insert("audio".to_string(), Buffer::text("a"));
        let chunk = DataChunk::named("sync", buffers, 0);

        let declared = vec!["audio".to_string(), "video".to_string()];
        assert_eq!(chunk.payload.missing_inputs(&declared), vec!["video"]);
    }

    #[test]
    fn test_chunk_serde_shape() {
        let chunk = DataChunk::single("c", Buffer::json(&serde_json::json!({"value": 10})).unwrap(), 3);
        let json = serde_json::to_value(&chunk).unwrap();
        // Payload is flattened: `buffer` sits beside `target_node_id`.
        assert_eq!(json["target_node_id"], "c");
        assert_eq!(json["sequence"], 3);
        assert!(json.get("buffer").is_some());

        let back: DataChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_result_serde_uses_target_node_id() {
        let result = ChunkResult {
            node_id: "tts".to_string(),
            payload: ChunkPayload::Single { buffer: Buffer::text("ok") },
            sequence: 1,
            processing_time_ms: 2.5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["target_node_id"], "tts");
    }
}
