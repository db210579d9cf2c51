// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP surface: the WebSocket session endpoint, the unary sibling, and
//! the supported-nodes catalog.

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use mediaflux_api::ErrorPayload;
use mediaflux_core::chunk::DataChunk;
use mediaflux_core::manifest::PipelineManifest;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;
use crate::ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/version", get(get_version))
        .route("/api/v1/execute", post(execute))
        .route("/api/v1/stream", get(stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// Bind or accept-loop failures.
pub async fn serve(listen_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listener.local_addr()?, "fluxd listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// GET /api/v1/version — accepted protocol versions, the node catalog,
/// and the build fingerprint.
async fn get_version(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runtime.version_info())
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    manifest: PipelineManifest,
    #[serde(default)]
    inputs: Vec<DataChunk>,
}

/// POST /api/v1/execute — the unary sibling of the streaming session: one
/// manifest, a batch of inputs, one aggregated response.
async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    match state.runtime.execute_unary(&request.manifest, request.inputs).await {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::json!(outcome))).into_response(),
        Err(error) => {
            let status = if error.recoverable() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(serde_json::json!(ErrorPayload::from(&error)))).into_response()
        },
    }
}

/// GET /api/v1/stream — upgrade to the bidirectional session protocol.
async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}
