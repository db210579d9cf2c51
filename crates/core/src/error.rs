// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for MediaFlux.
//!
//! Every failure that can cross a component boundary is a [`FluxError`].
//! Each variant maps onto exactly one [`ErrorKind`] of the runtime's error
//! taxonomy, so transports can surface `{kind, message, recoverable,
//! failing_node_id}` without inspecting variant internals.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error taxonomy exposed to clients.
///
/// Serialized as snake_case strings on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Manifest malformed or rejected by the pipeline compiler.
    Validation,
    /// Protocol version outside the accepted set.
    VersionMismatch,
    /// Host cannot satisfy a declared capability requirement.
    CapabilityUnmet,
    /// A node's `process` failed or timed out.
    NodeExecution,
    /// Queue/memory/time budget exceeded inside the scheduler.
    ResourceLimit,
    /// IPC channel to a worker process lost mid-session.
    Transport,
    /// Invariant violation inside the runtime itself.
    Internal,
}

/// Main error type for MediaFlux operations.
#[derive(Debug, Error)]
pub enum FluxError {
    /// Manifest or chunk failed validation.
    ///
    /// Examples:
    /// - Unknown node type, cycle, kind mismatch, duplicate node id
    /// - A chunk whose named buffers do not cover a node's declared inputs
    #[error("validation error: {0}")]
    Validation(String),

    /// The manifest's protocol version is not accepted by this runtime.
    #[error("unsupported protocol version '{requested}' (accepted: {accepted})")]
    VersionMismatch { requested: String, accepted: String },

    /// A declared capability requirement cannot be met on this host.
    #[error("capability unmet: {0}")]
    CapabilityUnmet(String),

    /// A node's `process` call raised or exceeded its per-call timeout.
    #[error("node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// The scheduler itself ran out of a budgeted resource.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// The IPC channel backing an out-of-process node was lost.
    ///
    /// Treated as a fatal error of the affected node.
    #[error("transport error on node '{node_id}': {message}")]
    Transport { node_id: String, message: String },

    /// Invariant violation inside the scheduler. Always a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FluxError {
    /// The taxonomy kind for this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Self::CapabilityUnmet(_) => ErrorKind::CapabilityUnmet,
            Self::NodeExecution { .. } => ErrorKind::NodeExecution,
            Self::ResourceLimit(_) => ErrorKind::ResourceLimit,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the client can expect a retry (after fixing its side) to
    /// succeed against this same runtime.
    ///
    /// Validation and version errors are the client's to fix; everything
    /// else is fatal for the session on this host.
    pub const fn recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::VersionMismatch { .. })
    }

    /// The node this error is attributed to, if any.
    pub fn failing_node_id(&self) -> Option<&str> {
        match self {
            Self::NodeExecution { node_id, .. } | Self::Transport { node_id, .. } => {
                Some(node_id.as_str())
            },
            _ => None,
        }
    }

    /// Shorthand for a node execution failure.
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeExecution { node_id: node_id.into(), message: message.into() }
    }
}

/// Convenience type alias for Results using [`FluxError`].
pub type Result<T> = std::result::Result<T, FluxError>;
