// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MediaFlux IPC - the boundary between the scheduler and worker processes.
//!
//! Two halves:
//! - [`frame`]: the framed, little-endian record format every buffer is
//!   wrapped in on the bus. This layout is ABI.
//! - [`service`]: shared-memory pub/sub services (one input, one output per
//!   out-of-process node), named from `(session_id, node_id)`.

use thiserror::Error;

pub mod frame;
pub mod service;

pub use frame::{buffer_timestamp_ns, decode, encode, WireFrame};
pub use service::{
    input_service_name, output_service_name, IpcBus, WorkerLink, WorkerLinkConfig,
};

/// Errors at the IPC boundary.
///
/// The engine maps these onto the `Transport` kind of the runtime taxonomy,
/// attributing them to the affected node.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A received sample does not parse as a wire frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The buffer cannot be represented in the wire ABI.
    #[error("unsupported payload: {0}")]
    Unsupported(String),

    /// The underlying shared-memory bus failed.
    #[error("ipc service error: {0}")]
    Service(String),
}
