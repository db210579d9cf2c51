// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The WebSocket rendering of the streaming session protocol.
//!
//! One socket is one session. The reader half parses client messages and
//! routes chunks; the writer half forwards session events. They run as
//! separate tasks on purpose: `send_chunk` suspends under backpressure,
//! and the reply stream must keep flowing while it does, both to drain the
//! pipeline and to let the socket's flow control throttle the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use futures::SinkExt;
use mediaflux_api::{ClientMessage, ControlCommand, ErrorPayload, ServerMessage};
use mediaflux_engine::SessionEvent;
use opentelemetry::{global, KeyValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::AppState;

static ACTIVE_SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Connection metrics, shared across all sockets.
#[derive(Clone)]
struct WsMetrics {
    sessions_gauge: opentelemetry::metrics::Gauge<u64>,
    messages_counter: opentelemetry::metrics::Counter<u64>,
}

impl WsMetrics {
    fn shared() -> Self {
        static METRICS: OnceLock<WsMetrics> = OnceLock::new();
        METRICS
            .get_or_init(|| {
                let meter = global::meter("fluxd_sessions");
                Self {
                    sessions_gauge: meter
                        .u64_gauge("session.connections.active")
                        .with_description("Number of active streaming sessions")
                        .build(),
                    messages_counter: meter
                        .u64_counter("session.messages")
                        .with_description("Total session protocol messages")
                        .build(),
                }
            })
            .clone()
    }
}

/// Serialize and send one JSON message, reporting whether the socket is
/// still usable.
async fn send_json<S, T>(socket: &mut S, message: &T, what: &str) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: Serialize + Sync,
{
    match serde_json::to_string(message) {
        Ok(json) => {
            if socket.send(Message::Text(json.into())).await.is_err() {
                debug!("socket gone while sending {what}");
                Err(())
            } else {
                Ok(())
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to serialize {what}");
            Err(())
        },
    }
}

fn to_server_message(event: SessionEvent) -> ServerMessage {
    match event {
        SessionEvent::Ready { session_id } => ServerMessage::Ready { session_id },
        SessionEvent::Result(result) => ServerMessage::Result(result),
        SessionEvent::Error { error, .. } => ServerMessage::Error(ErrorPayload::from(&error)),
        SessionEvent::Closed { reason } => ServerMessage::Closed { reason },
    }
}

/// Drive one socket through a full session.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // First message must be Init.
    let mut handle = loop {
        let Some(Ok(message)) = ws_rx.next().await else {
            debug!("socket closed before init");
            return;
        };
        let Message::Text(text) = message else { continue };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Init { manifest, client_version, resource_limits }) => {
                info!(client_version, pipeline = %manifest.metadata.name, "session init");
                break state
                    .runtime
                    .open_session_with_limits(&manifest, resource_limits.as_ref())
                    .await;
            },
            Ok(other) => {
                warn!("expected init, got {other:?}");
                let error = ServerMessage::Error(ErrorPayload {
                    kind: mediaflux_core::ErrorKind::Validation,
                    message: "first message must be 'init'".to_string(),
                    recoverable: true,
                    failing_node_id: None,
                });
                if send_json(&mut ws_tx, &error, "protocol error").await.is_err() {
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, "unparseable pre-init message");
                return;
            },
        }
    };

    let metrics = WsMetrics::shared();
    let active = ACTIVE_SESSIONS.fetch_add(1, Ordering::Relaxed) + 1;
    metrics.sessions_gauge.record(active, &[]);

    let session_id = handle.session_id().to_string();
    let done = CancellationToken::new();

    // Writer: session events → socket, until Closed.
    let events = handle.take_events();
    let writer_done = done.clone();
    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        let mut events = events;
        while let Some(event) = events.recv().await {
            let is_closed = matches!(event, SessionEvent::Closed { .. });
            let reason = match &event {
                SessionEvent::Closed { reason } => Some(*reason),
                _ => None,
            };
            if send_json(&mut ws_tx, &to_server_message(event), "session event").await.is_err() {
                break;
            }
            if is_closed {
                info!(session = %writer_session, reason = ?reason, "session finished");
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        writer_done.cancel();
    });

    // Reader: client messages → session, until the session or socket ends.
    loop {
        let message = tokio::select! {
            () = done.cancelled() => break,
            message = ws_rx.next() => message,
        };
        let Some(Ok(message)) = message else {
            debug!(session = %session_id, "client socket closed");
            handle.close();
            break;
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Chunk(chunk)) => {
                    metrics.messages_counter.add(1, &[KeyValue::new("direction", "inbound")]);
                    // Suspends under backpressure; no further client input
                    // is read until the pipeline has room.
                    if handle.send_chunk(chunk).await.is_err() {
                        break;
                    }
                },
                Ok(ClientMessage::Control { command: ControlCommand::Close }) => {
                    info!(session = %session_id, "client requested close");
                    handle.close();
                },
                Ok(ClientMessage::Init { .. }) => {
                    warn!(session = %session_id, "duplicate init ignored");
                },
                Err(e) => {
                    warn!(session = %session_id, error = %e, "unparseable message ignored");
                },
            },
            Message::Close(_) => {
                handle.close();
            },
            _ => {},
        }
    }

    handle.close();
    handle.finished().await;
    let _ = writer.await;

    let active = ACTIVE_SESSIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    metrics.sessions_gauge.record(active, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflux_api::CloseReason;
    use mediaflux_core::error::FluxError;

    #[test]
    fn test_event_mapping_preserves_close_reason() {
        let message = to_server_message(SessionEvent::Closed { reason: CloseReason::Error });
        assert!(matches!(message, ServerMessage::Closed { reason: CloseReason::Error }));
    }

    #[test]
    fn test_event_mapping_carries_failing_node() {
        let message = to_server_message(SessionEvent::Error {
            error: FluxError::node("n2", "boom"),
            fatal: true,
        });
        match message {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.failing_node_id.as_deref(), Some("n2"));
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
