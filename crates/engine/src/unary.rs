// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Unary execution: run a manifest over a batch of inputs and aggregate
//! everything, implemented as a one-shot session. Same semantics as the
//! streaming path, no interleaving.

use std::collections::HashMap;
use std::time::Instant;

use mediaflux_core::chunk::{ChunkResult, DataChunk};
use mediaflux_core::error::{ErrorKind, FluxError, Result};
use serde::{Deserialize, Serialize};

use crate::scheduler::{CloseReason, SessionEvent};
use crate::session::SessionHandle;

/// A non-fatal error that occurred during execution (tolerant node, chunk
/// rejected at routing). Kept in the outcome so partial success is visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnaryNodeError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate execution metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnaryMetrics {
    pub chunks_sent: usize,
    pub results: usize,
    pub elapsed_ms: f64,
}

/// The aggregated result of one unary execution.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnaryOutcome {
    /// Results grouped by producing node, each in production order.
    pub outputs: HashMap<String, Vec<ChunkResult>>,
    pub errors: Vec<UnaryNodeError>,
    pub metrics: UnaryMetrics,
}

/// Feed every chunk, close intake, and drain the event stream to the end.
///
/// Feeding and collecting run concurrently: collecting cannot wait for
/// feeding to finish, or reply-stream backpressure would deadlock a large
/// batch against a full collector channel.
pub(crate) async fn run_unary(
    mut handle: SessionHandle,
    chunks: Vec<DataChunk>,
) -> Result<UnaryOutcome> {
    let started = Instant::now();
    let chunks_sent = chunks.len();

    let chunk_tx = handle.chunk_tx.take();
    let feeder = async move {
        if let Some(tx) = chunk_tx {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    tracing::debug!("session stopped accepting mid-batch");
                    break;
                }
            }
        }
        // Dropping the sender closes intake; the driver drains what is
        // queued and closes the session normally.
    };

    let collector = async {
        let mut outputs: HashMap<String, Vec<ChunkResult>> = HashMap::new();
        let mut errors = Vec::new();
        let mut fatal: Option<FluxError> = None;
        let mut reason = CloseReason::Normal;

        while let Some(event) = handle.next_event().await {
            match event {
                SessionEvent::Ready { .. } => {},
                SessionEvent::Result(result) => {
                    outputs.entry(result.node_id.clone()).or_default().push(result);
                },
                SessionEvent::Error { error, fatal: true } => fatal = Some(error),
                SessionEvent::Error { error, fatal: false } => errors.push(UnaryNodeError {
                    node_id: error.failing_node_id().map(ToString::to_string),
                    kind: error.kind(),
                    message: error.to_string(),
                }),
                SessionEvent::Closed { reason: r } => {
                    reason = r;
                    break;
                },
            }
        }
        (outputs, errors, fatal, reason)
    };

    let ((), (outputs, errors, fatal, reason)) = tokio::join!(feeder, collector);

    if let Some(error) = fatal {
        return Err(error);
    }
    if reason == CloseReason::Error {
        return Err(FluxError::Internal(
            "session closed with an error but reported none".to_string(),
        ));
    }

    let results = outputs.values().map(Vec::len).sum();
    Ok(UnaryOutcome {
        outputs,
        errors,
        metrics: UnaryMetrics {
            chunks_sent,
            results,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        },
    })
}
