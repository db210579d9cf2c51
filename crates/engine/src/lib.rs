// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MediaFlux Engine - compiles pipeline manifests and executes them as
//! streaming sessions.
//!
//! - [`compiler`]: manifest → validated [`graph::ExecutableGraph`], with an
//!   all-failures [`compiler::ValidationReport`]
//! - [`scheduler`]: per-node actor tasks, bounded queues, backpressure,
//!   drain and cleanup
//! - [`session`]: the client-facing session handle and its driver
//! - [`unary`]: one-shot execution over a batch of inputs
//! - [`runtime`]: the owning handle tying registry, host capabilities, and
//!   the model store together
//! - [`version`]: protocol gate and the GetVersion payload

pub mod compiler;
pub mod graph;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod unary;
pub mod version;

pub use compiler::{compile, CompilerConfig, IssueCode, ValidationIssue, ValidationReport};
pub use graph::{EdgeTarget, ExecutableGraph, GraphEdge, GraphNode};
pub use runtime::{Runtime, RuntimeConfig};
pub use scheduler::{CloseReason, SchedulerConfig, SessionEvent};
pub use session::{ChunkSender, SessionHandle, SessionState};
pub use unary::{UnaryMetrics, UnaryNodeError, UnaryOutcome};
pub use version::{build_fingerprint, VersionInfo};
