// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The node runtime contract.
//!
//! This module defines the shape of a processing node:
//! - [`PipelineNode`]: the trait every node implements
//! - [`NodeDescriptor`]: declared ports and streaming classification
//! - [`InitContext`]: identity handed to a node before the first chunk
//! - [`OutputSink`]: the handle through which `process` emits its outputs
//!
//! A node's output sequence is lazy, ordered, finite, and non-restartable:
//! each call to [`OutputSink::emit`] delivers one buffer straight into the
//! bounded queues of the downstream nodes (or the client collector) and may
//! suspend under backpressure. Zero emissions per chunk is an accumulator,
//! one is the unary case, many is the streaming case.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::buffer::Buffer;
use crate::capability::CapabilityRequirements;
use crate::chunk::{ChunkPayload, ChunkResult, DataChunk};
use crate::error::{FluxError, Result};
use crate::manifest::{InputPort, OutputPort, DEFAULT_OUTPUT};

/// Declared ports and streaming classification of a node instance.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    /// True iff `process` may emit more than one output per chunk. The
    /// scheduler treats both classes uniformly but pre-sizes per-edge
    /// buffers with this flag.
    pub streaming: bool,
}

impl NodeDescriptor {
    /// A unary node with the conventional single `in`/`out` ports.
    pub fn unary(inputs: Vec<InputPort>, outputs: Vec<OutputPort>) -> Self {
        Self { inputs, outputs, streaming: false }
    }

    /// A streaming node (may emit many outputs per chunk).
    pub fn streaming(inputs: Vec<InputPort>, outputs: Vec<OutputPort>) -> Self {
        Self { inputs, outputs, streaming: true }
    }

    /// Names of all declared input ports.
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|p| p.name.clone()).collect()
    }

    /// Whether this node requires jointly-delivered named inputs.
    pub fn is_multi_input(&self) -> bool {
        self.inputs.len() > 1
    }
}

/// Identity and shared services handed to a node during `initialize`.
pub struct InitContext {
    pub session_id: String,
    pub node_id: String,
    /// Process-wide store for model weights shared across same-type nodes.
    pub models: Arc<crate::model_store::ModelStore>,
}

/// One delivery target on an outbound edge.
pub enum OutputTarget {
    /// Deliver into a downstream node's inbound queue.
    Node {
        node_id: Arc<str>,
        /// Downstream input port; wraps the buffer as a named payload when
        /// the target is a multi-input node.
        input: Option<String>,
        tx: mpsc::Sender<DataChunk>,
    },
    /// Deliver to the session's client collector.
    Client { tx: mpsc::Sender<ChunkResult> },
}

/// The handle through which a node emits its outputs.
///
/// Delivery uses a `try_send` fast path and falls back to an awaited send,
/// so a full downstream queue suspends the emitting node cooperatively —
/// this is the backpressure path, and it propagates upstream chunk by chunk.
pub struct OutputSink {
    node_id: Arc<str>,
    routes: HashMap<String, Vec<OutputTarget>>,
    sequence: u64,
    timestamp_ms: u64,
    started: Instant,
}

impl OutputSink {
    pub fn new(node_id: Arc<str>, routes: HashMap<String, Vec<OutputTarget>>) -> Self {
        Self { node_id, routes, sequence: 0, timestamp_ms: 0, started: Instant::now() }
    }

    /// The owning node's id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Called by the scheduler before each `process` invocation so emitted
    /// outputs inherit the triggering chunk's sequence and timestamp.
    pub fn begin_chunk(&mut self, sequence: u64, timestamp_ms: u64) {
        self.sequence = sequence;
        self.timestamp_ms = timestamp_ms;
        self.started = Instant::now();
    }

    /// Emit one buffer on the conventional single output port.
    pub async fn emit(&mut self, buffer: Buffer) -> Result<()> {
        self.emit_on(DEFAULT_OUTPUT, buffer).await
    }

    /// Emit one buffer on a named output port.
    ///
    /// The buffer is delivered to every edge wired to that port; cloning is
    /// cheap because payloads are refcounted.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::NodeExecution`] for an unknown port (a node
    /// bug), or [`FluxError::Internal`] when a delivery channel is closed,
    /// which nodes should treat as "the session is shutting down, stop".
    pub async fn emit_on(&mut self, output: &str, buffer: Buffer) -> Result<()> {
        let Some(targets) = self.routes.get(output) else {
            tracing::warn!(
                node = %self.node_id,
                output,
                available = ?self.routes.keys().collect::<Vec<_>>(),
                "emit on unknown output port"
            );
            return Err(FluxError::node(
                self.node_id.to_string(),
                format!("unknown output port '{output}'"),
            ));
        };

        for target in targets {
            match target {
                OutputTarget::Node { node_id, input, tx } => {
                    let payload = match input {
                        Some(name) => ChunkPayload::Named {
                            named_buffers: HashMap::from([(name.clone(), buffer.clone())]),
                        },
                        None => ChunkPayload::Single { buffer: buffer.clone() },
                    };
                    let chunk = DataChunk {
                        target_node_id: node_id.to_string(),
                        payload,
                        sequence: self.sequence,
                        timestamp_ms: self.timestamp_ms,
                    };
                    send_with_backpressure(tx, chunk).await.map_err(|()| {
                        tracing::debug!(
                            node = %self.node_id,
                            downstream = %node_id,
                            "downstream queue closed, stopping delivery"
                        );
                        FluxError::Internal(format!(
                            "inbound queue of '{node_id}' closed during delivery"
                        ))
                    })?;
                },
                OutputTarget::Client { tx } => {
                    let result = ChunkResult {
                        node_id: self.node_id.to_string(),
                        payload: ChunkPayload::Single { buffer: buffer.clone() },
                        sequence: self.sequence,
                        processing_time_ms: self.started.elapsed().as_secs_f64() * 1000.0,
                    };
                    send_with_backpressure(tx, result).await.map_err(|()| {
                        FluxError::Internal("client collector closed during delivery".to_string())
                    })?;
                },
            }
        }
        Ok(())
    }
}

/// try_send fast path, awaited send on a full queue. Err(()) means the
/// receiving side is gone.
async fn send_with_backpressure<T>(tx: &mpsc::Sender<T>, value: T) -> std::result::Result<(), ()> {
    use tokio::sync::mpsc::error::TrySendError;

    match tx.try_send(value) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(value)) => tx.send(value).await.map_err(|_| ()),
        Err(TrySendError::Closed(_)) => Err(()),
    }
}

/// The contract every processing node implements.
///
/// Lifecycle: construct (via registry factory) → `initialize` once →
/// `process` zero or more times, serialized per node → `cleanup` exactly
/// once, on every exit path including errors and cancellation.
#[async_trait]
pub trait PipelineNode: Send {
    /// Declared ports and streaming classification for this instance.
    fn descriptor(&self) -> NodeDescriptor;

    /// Called once after construction, before any chunk. May allocate
    /// models or open external resources; heavy work belongs on the
    /// blocking pool via [`run_blocking`]. Failure aborts the session.
    async fn initialize(&mut self, _ctx: &InitContext) -> Result<()> {
        Ok(())
    }

    /// Process one chunk, emitting any number of outputs through `out`.
    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()>;

    /// Called exactly once when the session closes or this node fails.
    /// Must not assume `process` ever ran.
    async fn cleanup(&mut self) {}

    /// Static admission requirements, if any.
    fn capability_requirements(&self) -> Option<CapabilityRequirements> {
        None
    }
}

/// Dispatch blocking work (inference, codec operations) to the runtime's
/// bounded blocking pool and await the result.
///
/// # Errors
///
/// Returns [`FluxError::Internal`] if the blocking task panics or is
/// aborted.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FluxError::Internal(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;

    fn sink_with_client(
        node_id: &str,
    ) -> (OutputSink, mpsc::Receiver<ChunkResult>) {
        let (tx, rx) = mpsc::channel(4);
        let routes = HashMap::from([(
            DEFAULT_OUTPUT.to_string(),
            vec![OutputTarget::Client { tx }],
        )]);
        (OutputSink::new(Arc::from(node_id), routes), rx)
    }

    #[tokio::test]
    async fn test_emit_wraps_chunk_result() {
        let (mut sink, mut rx) = sink_with_client("tts");
        sink.begin_chunk(7, 123);
        sink.emit(Buffer::text("hello")).await.unwrap();

        let result = rx.recv().await.unwrap();
        assert_eq!(result.node_id, "tts");
        assert_eq!(result.sequence, 7);
        assert!(result.processing_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_emit_unknown_port_is_node_error() {
        let (mut sink, _rx) = sink_with_client("tts");
        let err = sink.emit_on("bogus", Buffer::text("x")).await.unwrap_err();
        assert_eq!(err.failing_node_id(), Some("tts"));
    }

    #[tokio::test]
    async fn test_emit_to_named_downstream_input() {
        let (tx, mut rx) = mpsc::channel(4);
        let routes = HashMap::from([(
            DEFAULT_OUTPUT.to_string(),
            vec![OutputTarget::Node {
                node_id: Arc::from("sync"),
                input: Some("audio".to_string()),
                tx,
            }],
        )]);
        let mut sink = OutputSink::new(Arc::from("mic"), routes);
        sink.begin_chunk(0, 0);
        sink.emit(Buffer::text("pcm")).await.unwrap();

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.target_node_id, "sync");
        match chunk.payload {
            ChunkPayload::Named { named_buffers } => {
                assert_eq!(named_buffers["audio"].kind(), BufferKind::Text);
            },
            ChunkPayload::Single { .. } => panic!("expected named payload"),
        }
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_result() {
        let value = run_blocking(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
    }
}
