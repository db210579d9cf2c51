// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The streaming scheduler: one long-lived task per node, one collector per
//! sink, bounded queues end to end.
//!
//! Data path: a routed chunk lands in its target node's bounded inbound
//! queue; the node task dequeues, runs `process` under the per-call
//! timeout, and every emitted buffer is pushed into the downstream queues
//! (or the sink's collector) with a try-send fast path and an awaited send
//! on a full queue. Backpressure therefore propagates chunk by chunk from
//! the slowest node back to the client. Nothing on this path is ever
//! silently dropped.
//!
//! Shutdown: intake stops, queued work drains inside a bounded window, the
//! cancellation token wakes whatever is still blocked, straggler tasks are
//! aborted, and `cleanup()` runs exactly once per initialized node in
//! reverse topological order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediaflux_core::buffer::BufferKind;
use mediaflux_core::chunk::{ChunkResult, DataChunk};
use mediaflux_core::error::FluxError;
use mediaflux_core::model_store::ModelStore;
use mediaflux_core::node::{InitContext, OutputSink, OutputTarget, PipelineNode};
use opentelemetry::{global, KeyValue};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::graph::{EdgeTarget, ExecutableGraph};

/// Scheduler tuning. Defaults follow the runtime's operational
/// configuration surface; none of these are hard-coded at call sites.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ceiling for a single `process` call. Exceeding it is a fatal node
    /// error.
    pub per_call_timeout: Duration,
    /// How long queued work may keep running after intake stops.
    pub drain_window: Duration,
    /// Capacity of each sink's collector channel. Streaming sinks get
    /// twice this, since one chunk may fan into many results.
    pub reply_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            per_call_timeout: Duration::from_secs(30),
            drain_window: Duration::from_secs(5),
            reply_capacity: 64,
        }
    }
}

// The close reason is part of the wire contract; sessions reuse it
// directly.
pub use mediaflux_api::CloseReason;

/// Everything a session surfaces to its client, in order.
#[derive(Debug)]
pub enum SessionEvent {
    Ready { session_id: String },
    Result(ChunkResult),
    /// `fatal: false` events (tolerant nodes, rejected chunks) leave the
    /// session running; a fatal event is always followed by `Closed`.
    Error { error: FluxError, fatal: bool },
    Closed { reason: CloseReason },
}

/// Route-time view of one node's inbound side.
struct NodeIntake {
    tx: mpsc::Sender<DataChunk>,
    /// Weak handle kept for the drain-idle probe after intake stops.
    weak_tx: mpsc::WeakSender<DataChunk>,
    declared_inputs: Vec<String>,
    accepted: HashMap<String, Vec<BufferKind>>,
    capacity: usize,
}

struct ManagedNode {
    id: String,
    instance: Arc<Mutex<Box<dyn PipelineNode>>>,
}

/// A live, spawned pipeline bound to one session.
pub struct RunningPipeline {
    session_id: String,
    intakes: HashMap<String, NodeIntake>,
    /// Reverse-topological order for cleanup.
    cleanup_order: Vec<ManagedNode>,
    node_tasks: Vec<JoinHandle<()>>,
    collector_tasks: Vec<JoinHandle<()>>,
    /// Session-level stop signal: cancelled on client close or fatal error.
    stop: CancellationToken,
    /// Hard-stop for the drain phase; wakes idle node tasks.
    cancel: CancellationToken,
    /// First fatal error wins; the driver drains this.
    fatal_rx: mpsc::Receiver<FluxError>,
    last_sequence: HashMap<String, u64>,
    config: SchedulerConfig,
}

impl RunningPipeline {
    /// Initialize every node and spawn the per-node and per-sink tasks.
    ///
    /// Nodes are initialized in topological order; if one fails, the ones
    /// already initialized are cleaned up in reverse order before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// The failing node's `initialize` error, attributed to that node.
    pub async fn spawn(
        session_id: String,
        mut graph: ExecutableGraph,
        config: SchedulerConfig,
        events_tx: mpsc::Sender<SessionEvent>,
        stop: CancellationToken,
        models: Arc<ModelStore>,
    ) -> Result<Self, FluxError> {
        let cancel = CancellationToken::new();
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        // --- Inbound queues, sized by the compiler ---
        let mut intakes = HashMap::new();
        let mut receivers: HashMap<String, mpsc::Receiver<DataChunk>> = HashMap::new();
        for node in graph.nodes.values() {
            let (tx, rx) = mpsc::channel(node.queue_capacity);
            let accepted = node
                .descriptor
                .inputs
                .iter()
                .map(|p| (p.name.clone(), p.kinds.clone()))
                .collect();
            intakes.insert(
                node.id.clone(),
                NodeIntake {
                    weak_tx: tx.downgrade(),
                    tx,
                    declared_inputs: node.descriptor.input_names(),
                    accepted,
                    capacity: node.queue_capacity,
                },
            );
            receivers.insert(node.id.clone(), rx);
        }

        // --- One collector per client-forwarding node. Terminal sinks
        // always qualify; a node may also feed the client alongside its
        // downstream edges.
        let mut collector_txs: HashMap<String, mpsc::Sender<ChunkResult>> = HashMap::new();
        let mut collector_tasks = Vec::new();
        for node in graph
            .nodes
            .values()
            .filter(|n| n.edges.iter().any(|e| e.target == EdgeTarget::Client))
        {
            let capacity = if node.descriptor.streaming {
                config.reply_capacity * 2
            } else {
                config.reply_capacity
            };
            let (tx, mut rx) = mpsc::channel::<ChunkResult>(capacity);
            collector_txs.insert(node.id.clone(), tx);

            let events = events_tx.clone();
            let sink_id = node.id.clone();
            collector_tasks.push(tokio::spawn(
                async move {
                    while let Some(result) = rx.recv().await {
                        if events.send(SessionEvent::Result(result)).await.is_err() {
                            tracing::debug!(sink = %sink_id, "reply stream gone, collector exiting");
                            break;
                        }
                    }
                }
                .instrument(tracing::debug_span!("collector", session = %session_id)),
            ));
        }

        // --- Output sinks wired from the compiled edges ---
        let mut sinks: HashMap<String, OutputSink> = HashMap::new();
        for node in graph.nodes.values() {
            let mut routes: HashMap<String, Vec<OutputTarget>> = HashMap::new();
            for edge in &node.edges {
                let target = match &edge.target {
                    EdgeTarget::Node { id, input } => OutputTarget::Node {
                        node_id: Arc::from(id.as_str()),
                        input: input.clone(),
                        tx: intakes[id].tx.clone(),
                    },
                    EdgeTarget::Client => {
                        OutputTarget::Client { tx: collector_txs[&node.id].clone() }
                    },
                };
                routes.entry(edge.output.clone()).or_default().push(target);
            }
            sinks.insert(node.id.clone(), OutputSink::new(Arc::from(node.id.as_str()), routes));
        }
        drop(collector_txs);

        // --- Initialize in topological order ---
        let mut initialized: Vec<String> = Vec::new();
        let mut init_error: Option<FluxError> = None;
        for id in &graph.topo_order {
            let node = graph
                .nodes
                .get_mut(id)
                .ok_or_else(|| FluxError::Internal(format!("topo order names unknown node '{id}'")))?;
            let ctx = InitContext {
                session_id: session_id.clone(),
                node_id: id.clone(),
                models: models.clone(),
            };
            match node.instance.initialize(&ctx).await {
                Ok(()) => initialized.push(id.clone()),
                Err(e) => {
                    tracing::error!(node = %id, error = %e, "node failed to initialize");
                    init_error = Some(attribute_to(e, id));
                    break;
                },
            }
        }
        if let Some(error) = init_error {
            for id in initialized.iter().rev() {
                if let Some(node) = graph.nodes.get_mut(id) {
                    node.instance.cleanup().await;
                }
            }
            return Err(error);
        }

        // --- Spawn one task per node ---
        let meter = global::meter("mediaflux_engine");
        let histogram = meter.f64_histogram("node.process.duration").build();

        let mut cleanup_order = Vec::new();
        let mut node_tasks = Vec::new();
        for id in &graph.topo_order {
            let Some(node) = graph.nodes.swap_remove(id) else { continue };
            let instance = Arc::new(Mutex::new(node.instance));
            cleanup_order.push(ManagedNode { id: id.clone(), instance: instance.clone() });

            let rx = receivers.remove(id).ok_or_else(|| {
                FluxError::Internal(format!("no inbound queue wired for node '{id}'"))
            })?;
            let sink = sinks.remove(id).ok_or_else(|| {
                FluxError::Internal(format!("no output sink wired for node '{id}'"))
            })?;

            let task = NodeTask {
                id: Arc::from(id.as_str()),
                node_type: node.node_type.clone(),
                tolerant: node.tolerant,
                instance,
                rx,
                sink,
                per_call_timeout: config.per_call_timeout,
                stop: stop.clone(),
                cancel: cancel.clone(),
                events_tx: events_tx.clone(),
                fatal_tx: fatal_tx.clone(),
                histogram: histogram.clone(),
            };
            let span =
                tracing::info_span!("node_run", session = %session_id, node = %id, kind = %node.node_type);
            node_tasks.push(tokio::spawn(task.run().instrument(span)));
        }
        cleanup_order.reverse();

        tracing::info!(
            session = %session_id,
            nodes = node_tasks.len(),
            sinks = collector_tasks.len(),
            "pipeline spawned"
        );

        Ok(Self {
            session_id,
            intakes,
            cleanup_order,
            node_tasks,
            collector_tasks,
            stop,
            cancel,
            fatal_rx,
            last_sequence: HashMap::new(),
            config,
        })
    }

    /// Take the fatal-error receiver (driver side).
    pub fn take_fatal_rx(&mut self) -> mpsc::Receiver<FluxError> {
        std::mem::replace(&mut self.fatal_rx, mpsc::channel(1).1)
    }

    /// Validate and enqueue one client chunk.
    ///
    /// Blocks (cooperatively) while the target queue is full — this is the
    /// path that throttles the client. Aborts the wait when the session
    /// stops.
    ///
    /// # Errors
    ///
    /// A recoverable [`FluxError::Validation`] when the chunk is rejected
    /// before enqueueing (unknown target, sequence regression, missing
    /// named inputs, kind mismatch, broken buffer invariants); the session
    /// keeps running and the caller reports the error. [`FluxError::Internal`]
    /// when the session is already stopping.
    pub async fn route(&mut self, chunk: DataChunk) -> Result<(), FluxError> {
        let intake = self.intakes.get(&chunk.target_node_id).ok_or_else(|| {
            FluxError::Validation(format!(
                "chunk targets unknown node '{}'",
                chunk.target_node_id
            ))
        })?;

        if let Some(last) = self.last_sequence.get(&chunk.target_node_id) {
            if chunk.sequence < *last {
                return Err(FluxError::Validation(format!(
                    "sequence {} for node '{}' is behind already-accepted {last}",
                    chunk.sequence, chunk.target_node_id
                )));
            }
        }

        chunk.payload.validate()?;

        let missing = chunk.payload.missing_inputs(&intake.declared_inputs);
        if !missing.is_empty() {
            return Err(FluxError::Validation(format!(
                "chunk for node '{}' is missing inputs: {}",
                chunk.target_node_id,
                missing.join(", ")
            )));
        }
        for input in &intake.declared_inputs {
            if let Some(buffer) = chunk.payload.buffer_for(input) {
                let accepted = &intake.accepted[input];
                if !accepted.contains(&buffer.kind()) {
                    return Err(FluxError::Validation(format!(
                        "input '{input}' of node '{}' accepts {}, got {}",
                        chunk.target_node_id,
                        accepted.iter().map(ToString::to_string).collect::<Vec<_>>().join("|"),
                        buffer.kind()
                    )));
                }
            }
        }

        self.last_sequence.insert(chunk.target_node_id.clone(), chunk.sequence);

        let tx = intake.tx.clone();
        tokio::select! {
            () = self.stop.cancelled() => {
                Err(FluxError::Internal("session is stopping, chunk not accepted".to_string()))
            },
            sent = tx.send(chunk) => sent.map_err(|_| {
                FluxError::Internal("inbound queue closed, chunk not accepted".to_string())
            }),
        }
    }

    /// Stop intake, drain, cancel, clean up. Consumes the pipeline so it
    /// runs exactly once.
    pub async fn shutdown(mut self) {
        let session_id = self.session_id.clone();
        tracing::info!(session = %session_id, "pipeline shutting down");
        self.stop.cancel();

        // (a) Stop accepting client chunks: drop the routing senders. Weak
        // handles stay behind for the idle probe.
        let probes: Vec<(String, mpsc::WeakSender<DataChunk>, usize, Arc<Mutex<Box<dyn PipelineNode>>>)> =
            self.cleanup_order
                .iter()
                .filter_map(|managed| {
                    self.intakes.remove(&managed.id).map(|intake| {
                        (managed.id.clone(), intake.weak_tx, intake.capacity, managed.instance.clone())
                    })
                })
                .collect();
        self.intakes.clear();

        // (b) Let in-flight and queued work finish inside the drain window.
        let deadline = Instant::now() + self.config.drain_window;
        loop {
            if Instant::now() >= deadline {
                tracing::warn!(session = %session_id, "drain window expired with work outstanding");
                break;
            }
            let mut idle = true;
            for (_, weak_tx, capacity, instance) in &probes {
                let queue_empty = weak_tx.upgrade().is_none_or(|tx| tx.capacity() == *capacity);
                let processing = instance.try_lock().is_err();
                if !queue_empty || processing {
                    idle = false;
                    break;
                }
            }
            if idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // (c) Wake everything still parked on a queue and stop the tasks.
        self.cancel.cancel();
        for task in &self.node_tasks {
            task.abort();
        }
        for task in self.node_tasks.drain(..) {
            let _ = task.await;
        }

        // (d) Cleanup every node exactly once, downstream first.
        for managed in &self.cleanup_order {
            let mut instance = managed.instance.lock().await;
            instance.cleanup().await;
            tracing::debug!(session = %session_id, node = %managed.id, "node cleaned up");
        }

        // Collectors end once the last sink sender is gone (tasks dropped
        // their OutputSinks when aborted above).
        for task in self.collector_tasks.drain(..) {
            let _ = task.await;
        }

        tracing::info!(session = %session_id, "pipeline shut down");
    }
}

/// The per-node actor loop.
struct NodeTask {
    id: Arc<str>,
    node_type: String,
    tolerant: bool,
    instance: Arc<Mutex<Box<dyn PipelineNode>>>,
    rx: mpsc::Receiver<DataChunk>,
    sink: OutputSink,
    per_call_timeout: Duration,
    stop: CancellationToken,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<SessionEvent>,
    fatal_tx: mpsc::Sender<FluxError>,
    histogram: opentelemetry::metrics::Histogram<f64>,
}

impl NodeTask {
    async fn run(mut self) {
        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => break,
                chunk = self.rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            // Serialized with the shutdown path's cleanup: whoever holds
            // the lock owns the node.
            let mut instance = self.instance.lock().await;
            self.sink.begin_chunk(chunk.sequence, chunk.timestamp_ms);
            let started = Instant::now();
            let outcome =
                tokio::time::timeout(self.per_call_timeout, instance.process(chunk, &mut self.sink))
                    .await;
            drop(instance);

            let status = match &outcome {
                Ok(Ok(())) => "ok",
                Ok(Err(_)) => "error",
                Err(_) => "timeout",
            };
            self.histogram.record(
                started.elapsed().as_secs_f64(),
                &[
                    KeyValue::new("node.id", self.id.to_string()),
                    KeyValue::new("node.kind", self.node_type.clone()),
                    KeyValue::new("status", status),
                ],
            );

            match outcome {
                Ok(Ok(())) => {},
                Ok(Err(error)) => {
                    if self.cancel.is_cancelled() {
                        // Delivery failures during teardown are expected.
                        break;
                    }
                    let error = attribute_to(error, &self.id);
                    if self.tolerant {
                        tracing::warn!(node = %self.id, %error, "tolerant node dropped a chunk");
                        if self
                            .events_tx
                            .send(SessionEvent::Error { error, fatal: false })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    } else {
                        self.fail(error);
                        break;
                    }
                },
                Err(_) => {
                    self.fail(FluxError::node(
                        self.id.to_string(),
                        format!("process exceeded {:?} per-call timeout", self.per_call_timeout),
                    ));
                    break;
                },
            }
        }
        tracing::debug!(node = %self.id, "node task exiting");
    }

    /// First fatal error wins; either way the session must stop.
    fn fail(&self, error: FluxError) {
        tracing::error!(node = %self.id, %error, "fatal node error");
        let _ = self.fatal_tx.try_send(error);
        self.stop.cancel();
    }
}

/// Attribute an unattributed error to the node it surfaced in.
fn attribute_to(error: FluxError, node_id: &str) -> FluxError {
    if error.failing_node_id().is_some() {
        return error;
    }
    match error {
        FluxError::Internal(message) => FluxError::Internal(message),
        other => FluxError::node(node_id, other.to_string()),
    }
}
