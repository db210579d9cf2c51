// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Splits text into bounded pieces on whitespace, the way a TTS front-end
//! wants its sentences fed.

use async_trait::async_trait;
use mediaflux_core::{
    Buffer, BufferKind, DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink,
    PipelineNode, Result, DEFAULT_INPUT,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextChunkerParams {
    /// Maximum characters per emitted piece.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

const fn default_max_chars() -> usize {
    80
}

pub struct TextChunkerNode {
    max_chars: usize,
}

impl TextChunkerNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize or the
    /// limit is zero.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: TextChunkerParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("text chunker params: {e}")))?;
        if params.max_chars == 0 {
            return Err(FluxError::Validation("max_chars must be positive".to_string()));
        }
        Ok(Self { max_chars: params.max_chars })
    }

    fn split(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            // An oversized single word goes out alone rather than growing
            // a piece past the limit.
            if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > self.max_chars
            {
                pieces.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

#[async_trait]
impl PipelineNode for TextChunkerNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::streaming(
            vec![InputPort::default_port(vec![BufferKind::Text])],
            vec![OutputPort::default_port(vec![BufferKind::Text])],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let text = match chunk.payload.buffer_for(DEFAULT_INPUT) {
            Some(Buffer::Text { text }) => text.clone(),
            _ => return Err(FluxError::Validation("text chunker input must be text".to_string())),
        };

        for piece in self.split(&text) {
            out.emit(Buffer::text(piece)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{drain_results, test_sink};

    fn texts(results: &[mediaflux_core::ChunkResult]) -> Vec<String> {
        results
            .iter()
            .map(|r| match r.payload.buffer_for("out").unwrap() {
                Buffer::Text { text } => text.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_splits_on_word_boundaries() {
        let mut node = TextChunkerNode::from_params(&serde_json::json!({"max_chars": 10})).unwrap();
        let (mut sink, mut rx) = test_sink("tc");

        sink.begin_chunk(0, 0);
        node.process(
            DataChunk::single("tc", Buffer::text("the quick brown fox jumps"), 0),
            &mut sink,
        )
        .await
        .unwrap();

        let pieces = texts(&drain_results(&mut rx));
        assert_eq!(pieces, vec!["the quick", "brown fox", "jumps"]);
    }

    #[tokio::test]
    async fn test_empty_text_emits_nothing() {
        let mut node = TextChunkerNode::from_params(&serde_json::json!({})).unwrap();
        let (mut sink, mut rx) = test_sink("tc");
        sink.begin_chunk(0, 0);
        node.process(DataChunk::single("tc", Buffer::text("   "), 0), &mut sink).await.unwrap();
        assert!(drain_results(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_oversized_word_goes_out_alone() {
        let mut node = TextChunkerNode::from_params(&serde_json::json!({"max_chars": 5})).unwrap();
        let (mut sink, mut rx) = test_sink("tc");
        sink.begin_chunk(0, 0);
        node.process(
            DataChunk::single("tc", Buffer::text("hi extraordinarily ok"), 0),
            &mut sink,
        )
        .await
        .unwrap();
        let pieces = texts(&drain_results(&mut rx));
        assert_eq!(pieces, vec!["hi", "extraordinarily", "ok"]);
    }
}
