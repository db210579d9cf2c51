// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One client session: a compiled pipeline, a driver task, and the event
//! stream the transport forwards to the client.
//!
//! Lifecycle is strictly one-way:
//!
//! ```text
//! Init ──Ready──▶ Running ──Close|FatalError──▶ Closing ──drain done──▶ Closed
//!   │                                                                    ▲
//!   └───────────── validation failure ──────────────────────────────────┘
//! ```
//!
//! The event stream always terminates with `Closed`: a client sees either
//! results followed by `Closed { normal }`, or an `Error` followed by
//! `Closed { error }`. There is no third ending.

use mediaflux_core::chunk::DataChunk;
use mediaflux_core::error::FluxError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{CloseReason, RunningPipeline, SessionEvent};

/// Observable session states, transitions one-way only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Ready,
    Running,
    Closing,
    Closed,
}

/// The transport-facing handle of one session.
pub struct SessionHandle {
    session_id: String,
    pub(crate) chunk_tx: Option<mpsc::Sender<DataChunk>>,
    pub(crate) events: mpsc::Receiver<SessionEvent>,
    stop: CancellationToken,
    state_rx: watch::Receiver<SessionState>,
    pub(crate) driver: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Submit one chunk. Suspends while the session is applying
    /// backpressure; the transport must not read further client input until
    /// this returns.
    ///
    /// # Errors
    ///
    /// [`FluxError::Internal`] when the session is no longer accepting
    /// chunks (closing or closed).
    pub async fn send_chunk(&self, chunk: DataChunk) -> Result<(), FluxError> {
        let tx = self.chunk_tx.as_ref().ok_or_else(|| {
            FluxError::Internal("session was rejected at compile time".to_string())
        })?;
        tx.send(chunk)
            .await
            .map_err(|_| FluxError::Internal("session is no longer accepting chunks".to_string()))
    }

    /// A cloneable chunk submitter, for transports that feed from a
    /// separate task while the handle itself drains events. `None` when
    /// the session was rejected at compile time.
    pub fn chunk_sender(&self) -> Option<ChunkSender> {
        self.chunk_tx.as_ref().map(|tx| ChunkSender { tx: tx.clone() })
    }

    /// Request an orderly close. Honored immediately: intake stops, queued
    /// work drains inside the configured window, `cleanup` runs everywhere.
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Next server→client event. `None` only after `Closed` was delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Take the event stream, leaving a closed one behind. For transports
    /// that forward events from a dedicated writer task while the reader
    /// half keeps routing chunks — forwarding must never wait on routing,
    /// or reply backpressure would deadlock against intake backpressure.
    pub fn take_events(&mut self) -> mpsc::Receiver<SessionEvent> {
        std::mem::replace(&mut self.events, mpsc::channel(1).1)
    }

    /// Wait for the driver to finish (after `Closed`).
    pub async fn finished(&mut self) {
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

/// A detached chunk submitter bound to one session's intake.
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<DataChunk>,
}

impl ChunkSender {
    /// Same semantics as [`SessionHandle::send_chunk`].
    ///
    /// # Errors
    ///
    /// [`FluxError::Internal`] when the session is no longer accepting
    /// chunks.
    pub async fn send_chunk(&self, chunk: DataChunk) -> Result<(), FluxError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| FluxError::Internal("session is no longer accepting chunks".to_string()))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // An abandoned handle must still tear its pipeline down.
        self.stop.cancel();
    }
}

/// Build the handle for a session that never became ready: the event
/// stream is exactly `Error` then `Closed { error }`.
pub(crate) fn rejected_session(session_id: String, error: FluxError) -> SessionHandle {
    let (events_tx, events) = mpsc::channel(2);
    let _ = events_tx.try_send(SessionEvent::Error { error, fatal: true });
    let _ = events_tx.try_send(SessionEvent::Closed { reason: CloseReason::Error });
    let (_state_tx, state_rx) = watch::channel(SessionState::Closed);

    SessionHandle {
        session_id,
        chunk_tx: None,
        events,
        stop: CancellationToken::new(),
        state_rx,
        driver: None,
    }
}

/// Wire a compiled-and-spawned pipeline to a fresh handle and start the
/// driver.
pub(crate) fn open_session(
    session_id: String,
    mut pipeline: RunningPipeline,
    events_tx: mpsc::Sender<SessionEvent>,
    events: mpsc::Receiver<SessionEvent>,
    stop: CancellationToken,
) -> SessionHandle {
    let (chunk_tx, chunk_rx) = mpsc::channel(1);
    let (state_tx, state_rx) = watch::channel(SessionState::Ready);

    let fatal_rx = pipeline.take_fatal_rx();
    let driver = tokio::spawn(drive(
        session_id.clone(),
        pipeline,
        chunk_rx,
        fatal_rx,
        events_tx,
        stop.clone(),
        state_tx,
    ));

    SessionHandle { session_id, chunk_tx: Some(chunk_tx), events, stop, state_rx, driver: Some(driver) }
}

/// The session driver: pulls client chunks, routes them, and owns the
/// teardown sequence.
async fn drive(
    session_id: String,
    mut pipeline: RunningPipeline,
    mut chunk_rx: mpsc::Receiver<DataChunk>,
    mut fatal_rx: mpsc::Receiver<FluxError>,
    events_tx: mpsc::Sender<SessionEvent>,
    stop: CancellationToken,
    state_tx: watch::Sender<SessionState>,
) {
    loop {
        let maybe_chunk = tokio::select! {
            () = stop.cancelled() => break,
            maybe_chunk = chunk_rx.recv() => maybe_chunk,
        };
        let Some(chunk) = maybe_chunk else {
            // Client handle dropped with no explicit close: same thing.
            break;
        };
        let _ = state_tx.send(SessionState::Running);

        match pipeline.route(chunk).await {
            Ok(()) => {},
            Err(error @ FluxError::Internal(_)) => {
                tracing::debug!(session = %session_id, %error, "routing stopped");
                break;
            },
            Err(error) => {
                // Rejected before enqueue: report and keep going. This is
                // the "no loss without notice" path for bad chunks.
                if events_tx.send(SessionEvent::Error { error, fatal: false }).await.is_err() {
                    break;
                }
            },
        }
    }

    let _ = state_tx.send(SessionState::Closing);
    let fatal = fatal_rx.try_recv().ok();
    let reason = if fatal.is_some() { CloseReason::Error } else { CloseReason::Normal };

    // Drain before reporting: results already derived from accepted chunks
    // reach the client ahead of the fatal error and the terminal message.
    pipeline.shutdown().await;

    if let Some(error) = fatal {
        let _ = events_tx.send(SessionEvent::Error { error, fatal: true }).await;
    }
    let _ = events_tx.send(SessionEvent::Closed { reason }).await;
    let _ = state_tx.send(SessionState::Closed);
    tracing::info!(session = %session_id, reason = ?reason, "session closed");
}
