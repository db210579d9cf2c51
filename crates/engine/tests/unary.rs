// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The unary sibling: one manifest, a batch of inputs, one aggregated
//! response with per-node outputs and partial-success accounting.

mod common;

use std::sync::Arc;

use common::{json_chunk, manifest_json, test_runtime, LifecycleLog};
use mediaflux_core::error::ErrorKind;

#[tokio::test]
async fn test_unary_calculator_batch() {
    let log = Arc::new(LifecycleLog::default());
    let runtime = test_runtime(&log);
    let manifest = manifest_json(serde_json::json!({
        "protocol_version": "v1",
        "nodes": [{"id": "c", "node_type": "core::calculator", "params": {"op": "multiply", "value": 3.0}}],
        "connections": []
    }));

    let outcome = runtime
        .execute_unary(
            &manifest,
            vec![
                json_chunk("c", serde_json::json!({"value": 2}), 0),
                json_chunk("c", serde_json::json!({"value": 5}), 1),
            ],
        )
        .await
        .expect("unary execution succeeds");

    let results = &outcome.outputs["c"];
    assert_eq!(results.len(), 2);
    let values: Vec<serde_json::Value> = results
        .iter()
        .map(|r| r.payload.buffer_for("out").expect("buffer").json_value().expect("json"))
        .collect();
    assert_eq!(values[0], serde_json::json!({"result": 6}));
    assert_eq!(values[1], serde_json::json!({"result": 15}));

    assert_eq!(outcome.metrics.chunks_sent, 2);
    assert_eq!(outcome.metrics.results, 2);
    assert!(outcome.errors.is_empty());
    assert!(outcome.metrics.elapsed_ms >= 0.0);

    // Cleanup ran for the one node even on this path.
    assert_eq!(log.cleaned_nodes(), vec!["c"]);
}

#[tokio::test]
async fn test_unary_chain_aggregates_final_sink_only() {
    let log = Arc::new(LifecycleLog::default());
    let runtime = test_runtime(&log);
    let manifest = manifest_json(serde_json::json!({
        "protocol_version": "v1",
        "nodes": [
            {"id": "front", "node_type": "test::probe"},
            {"id": "x", "node_type": "core::expander", "params": {"factor": 2}, "is_streaming": true}
        ],
        "connections": [{"from_node": "front", "to_node": "x"}]
    }));

    let outcome = runtime
        .execute_unary(
            &manifest,
            vec![json_chunk("front", serde_json::json!({"value": 1}), 0)],
        )
        .await
        .expect("unary execution succeeds");

    // The intermediate probe feeds the expander; only the expander is a
    // sink, so only it appears in the outputs.
    assert!(!outcome.outputs.contains_key("front"));
    assert_eq!(outcome.outputs["x"].len(), 2);
}

#[tokio::test]
async fn test_unary_compile_failure_is_an_error() {
    let log = Arc::new(LifecycleLog::default());
    let runtime = test_runtime(&log);
    let manifest = manifest_json(serde_json::json!({
        "protocol_version": "v1",
        "nodes": [{"id": "a", "node_type": "no::such::node"}],
        "connections": []
    }));

    let error = runtime.execute_unary(&manifest, Vec::new()).await.expect_err("must fail");
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(error.recoverable());
}

#[tokio::test]
async fn test_unary_tolerant_errors_are_partial_success() {
    let log = Arc::new(LifecycleLog::default());
    let runtime = test_runtime(&log);
    // A tolerant failing node: the bad chunk is dropped with notice, the
    // rest of the batch flows.
    let manifest = manifest_json(serde_json::json!({
        "protocol_version": "v1",
        "nodes": [{"id": "f", "node_type": "test::fail_at",
                   "params": {"sequence": 1}, "tolerant": true}],
        "connections": []
    }));

    let outcome = runtime
        .execute_unary(
            &manifest,
            vec![
                json_chunk("f", serde_json::json!({"value": 0}), 0),
                json_chunk("f", serde_json::json!({"value": 1}), 1),
                json_chunk("f", serde_json::json!({"value": 2}), 2),
            ],
        )
        .await
        .expect("tolerant failures do not fail the execution");

    let sequences: Vec<u64> = outcome.outputs["f"].iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![0, 2], "the failed chunk is missing, the rest survived");

    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].kind, ErrorKind::NodeExecution);
    assert_eq!(outcome.errors[0].node_id.as_deref(), Some("f"));
}
