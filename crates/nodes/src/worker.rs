// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bridge to a node hosted in a separate worker process, typically a
//! Python process holding ML models.
//!
//! The bridge publishes every input buffer on the worker's input service
//! and forwards the worker's replies downstream. Its IPC services come up
//! in `initialize` and go away in `cleanup`, exactly the lifecycle of the
//! link itself; losing the channel mid-session surfaces as a `Transport`
//! error and kills the session.
//!
//! The bus carries no end-of-output marker, so the reply cadence is part
//! of the node's configuration: `replies_per_chunk` frames are awaited per
//! input (1 for a unary worker, N for a fixed-fanout streaming worker).

use async_trait::async_trait;
use mediaflux_core::{
    DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink, PipelineNode,
    Result, DEFAULT_INPUT,
};
use mediaflux_ipc::{IpcBus, IpcError, WorkerLink, WorkerLinkConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::passthrough::all_kinds;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerParams {
    /// Frames the worker publishes per input chunk.
    #[serde(default = "default_replies")]
    pub replies_per_chunk: u32,
    /// How long to wait for each reply before declaring the worker lost.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

const fn default_replies() -> u32 {
    1
}

const fn default_reply_timeout_ms() -> u64 {
    10_000
}

pub struct WorkerNode {
    params: WorkerParams,
    link: Option<WorkerLink>,
    node_id: String,
}

impl WorkerNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: WorkerParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("worker params: {e}")))?;
        Ok(Self { params, link: None, node_id: String::new() })
    }

    fn transport_error(&self, error: &IpcError) -> FluxError {
        FluxError::Transport { node_id: self.node_id.clone(), message: error.to_string() }
    }
}

#[async_trait]
impl PipelineNode for WorkerNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            inputs: vec![InputPort::default_port(all_kinds())],
            outputs: vec![OutputPort::default_port(all_kinds())],
            streaming: self.params.replies_per_chunk > 1,
        }
    }

    async fn initialize(&mut self, ctx: &mediaflux_core::InitContext) -> Result<()> {
        self.node_id = ctx.node_id.clone();
        let bus = IpcBus::new().map_err(|e| self.transport_error(&e))?;
        let link =
            WorkerLink::connect(&bus, &ctx.session_id, &ctx.node_id, &WorkerLinkConfig::default())
                .map_err(|e| self.transport_error(&e))?;
        self.link = Some(link);
        tracing::info!(node = %ctx.node_id, "worker services up");
        Ok(())
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let node_id = self.node_id.clone();
        let replies = self.params.replies_per_chunk;
        let reply_timeout = Duration::from_millis(self.params.reply_timeout_ms);

        let link = self
            .link
            .as_mut()
            .ok_or_else(|| FluxError::Internal("worker link used before initialize".to_string()))?;

        let buffer = chunk
            .payload
            .buffer_for(DEFAULT_INPUT)
            .ok_or_else(|| FluxError::Validation("worker chunk has no buffer".to_string()))?;
        link.publish(buffer).map_err(|e| FluxError::Transport {
            node_id: node_id.clone(),
            message: e.to_string(),
        })?;

        for _ in 0..replies {
            let frame = link
                .receive(reply_timeout)
                .await
                .map_err(|e| FluxError::Transport {
                    node_id: node_id.clone(),
                    message: e.to_string(),
                })?
                .ok_or_else(|| FluxError::Transport {
                    node_id: node_id.clone(),
                    message: format!("worker produced no reply within {reply_timeout:?}"),
                })?;
            out.emit(frame.buffer).await?;
        }
        Ok(())
    }

    async fn cleanup(&mut self) {
        if self.link.take().is_some() {
            tracing::info!(node = %self.node_id, "worker services torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_classification_follows_reply_count() {
        #[allow(clippy::unwrap_used)]
        let unary = WorkerNode::from_params(&serde_json::json!({})).unwrap();
        assert!(!unary.descriptor().streaming);

        #[allow(clippy::unwrap_used)]
        let streaming =
            WorkerNode::from_params(&serde_json::json!({"replies_per_chunk": 4})).unwrap();
        assert!(streaming.descriptor().streaming);
    }

    #[tokio::test]
    async fn test_process_before_initialize_is_internal_error() {
        #[allow(clippy::unwrap_used)]
        let mut node = WorkerNode::from_params(&serde_json::json!({})).unwrap();
        let (mut sink, _rx) = crate::test_utils::test_sink("w");
        sink.begin_chunk(0, 0);
        let err = node
            .process(
                DataChunk::single("w", mediaflux_core::Buffer::text("x"), 0),
                &mut sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FluxError::Internal(_)));
    }
}
