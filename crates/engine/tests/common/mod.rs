// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for the engine integration tests: a runtime carrying
//! the builtin catalog plus a few purpose-built probe nodes.

// Each test binary uses a different slice of these fixtures.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediaflux_core::async_trait;
use mediaflux_core::{
    Buffer, DataChunk, FluxError, InitContext, InputPort, NodeDescriptor, NodeRegistry,
    OutputPort, OutputSink, PipelineNode, Result, DEFAULT_INPUT,
};
use mediaflux_engine::{Runtime, RuntimeConfig, SessionEvent, SessionHandle};

/// Records lifecycle calls so tests can assert cleanup completeness.
#[derive(Default)]
pub struct LifecycleLog {
    pub initialized: Mutex<Vec<String>>,
    pub cleaned: Mutex<Vec<String>>,
}

impl LifecycleLog {
    pub fn cleaned_nodes(&self) -> Vec<String> {
        self.cleaned.lock().expect("lifecycle log lock").clone()
    }
}

fn all_kinds() -> Vec<mediaflux_core::BufferKind> {
    use mediaflux_core::BufferKind;
    vec![
        BufferKind::Audio,
        BufferKind::Video,
        BufferKind::Tensor,
        BufferKind::Json,
        BufferKind::Text,
        BufferKind::Binary,
    ]
}

/// Forwards its input after recording lifecycle events; optionally sleeps
/// per chunk, optionally fails at a given sequence.
pub struct ProbeNode {
    log: Arc<LifecycleLog>,
    node_id: String,
    delay: Option<Duration>,
    fail_at: Option<u64>,
}

impl ProbeNode {
    pub fn new(log: Arc<LifecycleLog>) -> Self {
        Self { log, node_id: String::new(), delay: None, fail_at: None }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_at(mut self, sequence: u64) -> Self {
        self.fail_at = Some(sequence);
        self
    }
}

#[async_trait]
impl PipelineNode for ProbeNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::unary(
            vec![InputPort::default_port(all_kinds())],
            vec![OutputPort::default_port(all_kinds())],
        )
    }

    async fn initialize(&mut self, ctx: &InitContext) -> Result<()> {
        self.node_id = ctx.node_id.clone();
        self.log.initialized.lock().expect("lock").push(ctx.node_id.clone());
        Ok(())
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(chunk.sequence) {
            return Err(FluxError::node(
                self.node_id.clone(),
                format!("induced failure at sequence {}", chunk.sequence),
            ));
        }
        if let Some(buffer) = chunk.payload.buffer_for(DEFAULT_INPUT) {
            out.emit(buffer.clone()).await?;
        }
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.log.cleaned.lock().expect("lock").push(self.node_id.clone());
    }
}

/// A registry with the builtin catalog plus the probe types, all sharing
/// one lifecycle log.
pub fn test_registry(log: &Arc<LifecycleLog>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    mediaflux_nodes::register_builtins(&mut registry);

    let probe_log = log.clone();
    registry.register(
        "test::probe",
        move |_params| Ok(Box::new(ProbeNode::new(probe_log.clone())) as Box<dyn PipelineNode>),
        NodeDescriptor::unary(
            vec![InputPort::default_port(all_kinds())],
            vec![OutputPort::default_port(all_kinds())],
        ),
        serde_json::json!({}),
    );

    let slow_log = log.clone();
    registry.register(
        "test::slow",
        move |params| {
            let delay_ms =
                params.get("delay_ms").and_then(serde_json::Value::as_u64).unwrap_or(100);
            Ok(Box::new(
                ProbeNode::new(slow_log.clone()).with_delay(Duration::from_millis(delay_ms)),
            ) as Box<dyn PipelineNode>)
        },
        NodeDescriptor::unary(
            vec![InputPort::default_port(all_kinds())],
            vec![OutputPort::default_port(all_kinds())],
        ),
        serde_json::json!({}),
    );

    let failer_log = log.clone();
    registry.register(
        "test::fail_at",
        move |params| {
            let sequence =
                params.get("sequence").and_then(serde_json::Value::as_u64).unwrap_or(0);
            Ok(Box::new(ProbeNode::new(failer_log.clone()).failing_at(sequence))
                as Box<dyn PipelineNode>)
        },
        NodeDescriptor::unary(
            vec![InputPort::default_port(all_kinds())],
            vec![OutputPort::default_port(all_kinds())],
        ),
        serde_json::json!({}),
    );

    registry
}

pub fn test_runtime(log: &Arc<LifecycleLog>) -> Runtime {
    Runtime::with_registry(test_registry(log), RuntimeConfig::default())
}

pub fn manifest_json(value: serde_json::Value) -> mediaflux_core::PipelineManifest {
    serde_json::from_value(value).expect("manifest fixture")
}

pub fn json_chunk(target: &str, value: serde_json::Value, sequence: u64) -> DataChunk {
    DataChunk::single(target, Buffer::json(&value).expect("json buffer"), sequence)
}

/// Receive the next event or panic after five seconds.
pub async fn next_event(handle: &mut SessionHandle) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), handle.next_event())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream ended unexpectedly")
}

/// Drain the stream until `Closed`, returning every event seen including
/// the terminal one.
pub async fn drain_to_close(handle: &mut SessionHandle) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), handle.next_event())
            .await
            .expect("timed out draining session events")
            .expect("event stream ended without Closed");
        let is_closed = matches!(event, SessionEvent::Closed { .. });
        events.push(event);
        if is_closed {
            return events;
        }
    }
}
