// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MediaFlux Core - fundamental traits and data structures for the
//! streaming pipeline runtime.
//!
//! ## Core Modules
//!
//! - [`buffer`]: the tagged data model (audio, video, tensor, json, text, binary)
//! - [`chunk`]: routed units on the data path and client-facing results
//! - [`manifest`]: the client-supplied pipeline description
//! - [`node`]: the node runtime contract and output sink
//! - [`registry`]: node factory registry and catalog export
//! - [`capability`]: declared requirements and the host admission check
//! - [`model_store`]: shared model weights keyed by (identity, device)
//! - [`error`]: the error taxonomy surfaced to clients
//!
//! ## Quick Start
//!
//! ```ignore
//! use mediaflux_core::node::{PipelineNode, NodeDescriptor, OutputSink};
//! use mediaflux_core::registry::NodeRegistry;
//!
//! struct Passthrough;
//!
//! #[async_trait]
//! impl PipelineNode for Passthrough {
//!     fn descriptor(&self) -> NodeDescriptor { /* ... */ }
//!     async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) { /* ... */ }
//! }
//!
//! let mut registry = NodeRegistry::new();
//! registry.register("passthrough", /* ... */);
//! ```

// Re-export async_trait for use in node implementations
pub use async_trait::async_trait;

pub mod buffer;
pub mod capability;
pub mod chunk;
pub mod error;
pub mod manifest;
pub mod model_store;
pub mod node;
pub mod registry;

// Convenience re-exports for the types node implementations touch most.

pub use buffer::{Buffer, BufferKind};
pub use capability::{CapabilityRequirements, HostCapabilities};
pub use chunk::{ChunkPayload, ChunkResult, DataChunk};
pub use error::{ErrorKind, FluxError, Result};
pub use manifest::{
    Connection, InputPort, ManifestMetadata, NodeManifest, OutputPort, PipelineManifest,
    CLIENT_ENDPOINT, DEFAULT_INPUT, DEFAULT_OUTPUT,
};
pub use model_store::{ModelKey, ModelStore, SharedModel};
pub use node::{run_blocking, InitContext, NodeDescriptor, OutputSink, OutputTarget, PipelineNode};
pub use registry::{NodeDefinition, NodeFactory, NodeRegistry};
