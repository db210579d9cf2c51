// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Streaming fan-out node: one chunk in, `factor` outputs out.
//!
//! Mostly a scheduler workout — it exercises the many-outputs-per-chunk
//! contract and per-node output ordering. Text payloads get an index
//! suffix so downstream consumers can tell the copies apart; other kinds
//! are repeated unchanged.

use async_trait::async_trait;
use mediaflux_core::{
    Buffer, DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink,
    PipelineNode, Result, DEFAULT_INPUT,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::passthrough::all_kinds;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpanderParams {
    /// Outputs emitted per input chunk.
    #[serde(default = "default_factor")]
    pub factor: u32,
}

const fn default_factor() -> u32 {
    3
}

pub struct ExpanderNode {
    factor: u32,
}

impl ExpanderNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize or the
    /// factor is zero.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: ExpanderParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("expander params: {e}")))?;
        if params.factor == 0 {
            return Err(FluxError::Validation("expander factor must be at least 1".to_string()));
        }
        Ok(Self { factor: params.factor })
    }
}

#[async_trait]
impl PipelineNode for ExpanderNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::streaming(
            vec![InputPort::default_port(all_kinds())],
            vec![OutputPort::default_port(all_kinds())],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let buffer = chunk
            .payload
            .buffer_for(DEFAULT_INPUT)
            .ok_or_else(|| FluxError::Validation("expander chunk has no buffer".to_string()))?;

        for index in 0..self.factor {
            let copy = match buffer {
                Buffer::Text { text } => Buffer::text(format!("{text}#{index}")),
                other => other.clone(),
            };
            out.emit(copy).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{drain_results, test_sink};

    #[tokio::test]
    async fn test_emits_factor_outputs_in_order() {
        let mut node = ExpanderNode::from_params(&serde_json::json!({"factor": 3})).unwrap();
        let (mut sink, mut rx) = test_sink("x");

        sink.begin_chunk(0, 0);
        node.process(DataChunk::single("x", Buffer::text("a"), 0), &mut sink).await.unwrap();

        let results = drain_results(&mut rx);
        assert_eq!(results.len(), 3);
        let texts: Vec<String> = results
            .iter()
            .map(|r| match r.payload.buffer_for("out").unwrap() {
                Buffer::Text { text } => text.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["a#0", "a#1", "a#2"]);
    }

    #[tokio::test]
    async fn test_default_factor() {
        let node = ExpanderNode::from_params(&serde_json::json!({})).unwrap();
        assert_eq!(node.factor, 3);
    }

    #[test]
    fn test_zero_factor_rejected() {
        assert!(ExpanderNode::from_params(&serde_json::json!({"factor": 0})).is_err());
    }
}
