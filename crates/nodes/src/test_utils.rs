// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared helpers for node unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use mediaflux_core::chunk::{ChunkResult, DataChunk};
use mediaflux_core::model_store::ModelStore;
use mediaflux_core::node::{InitContext, OutputSink, OutputTarget};
use mediaflux_core::{Buffer, DEFAULT_OUTPUT};
use tokio::sync::mpsc;

/// An output sink whose default port feeds a collector the test can drain.
pub fn test_sink(node_id: &str) -> (OutputSink, mpsc::Receiver<ChunkResult>) {
    test_sink_on(node_id, &[DEFAULT_OUTPUT])
}

/// Like [`test_sink`] but wiring several named output ports to the same
/// collector.
pub fn test_sink_on(node_id: &str, outputs: &[&str]) -> (OutputSink, mpsc::Receiver<ChunkResult>) {
    let (tx, rx) = mpsc::channel(64);
    let mut routes = HashMap::new();
    for output in outputs {
        routes.insert((*output).to_string(), vec![OutputTarget::Client { tx: tx.clone() }]);
    }
    (OutputSink::new(Arc::from(node_id), routes), rx)
}

/// Drain everything currently buffered in the collector.
pub fn drain_results(rx: &mut mpsc::Receiver<ChunkResult>) -> Vec<ChunkResult> {
    let mut results = Vec::new();
    while let Ok(result) = rx.try_recv() {
        results.push(result);
    }
    results
}

/// A JSON chunk addressed to `target`.
pub fn json_chunk(target: &str, value: serde_json::Value, sequence: u64) -> DataChunk {
    #[allow(clippy::expect_used)]
    DataChunk::single(target, Buffer::json(&value).expect("json buffer"), sequence)
}

/// An init context with a fresh model store.
pub fn init_ctx(node_id: &str) -> InitContext {
    InitContext {
        session_id: "test-session".to_string(),
        node_id: node_id.to_string(),
        models: Arc::new(ModelStore::new()),
    }
}
