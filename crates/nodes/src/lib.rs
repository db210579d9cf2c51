// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in processing nodes for MediaFlux.
//!
//! Every node here is registered under a namespaced type name through
//! [`register_builtins`]; the server calls it once at startup, before the
//! first session seals the registry.

use mediaflux_core::registry::NodeRegistry;
use mediaflux_core::PipelineNode;
use schemars::JsonSchema;

pub mod audio_chunker;
pub mod audio_gain;
pub mod calculator;
pub mod expander;
pub mod passthrough;
pub mod sync_av;
pub mod text_chunker;
pub mod worker;

pub mod test_utils;

pub use audio_chunker::AudioChunkerNode;
pub use audio_gain::AudioGainNode;
pub use calculator::CalculatorNode;
pub use expander::ExpanderNode;
pub use passthrough::PassthroughNode;
pub use sync_av::SyncAvNode;
pub use text_chunker::TextChunkerNode;
pub use worker::WorkerNode;

fn schema_of<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(serde_json::Value::Null)
}

/// Register the built-in catalog.
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register_with_details(
        "core::passthrough",
        |_params| Ok(Box::new(PassthroughNode) as Box<dyn PipelineNode>),
        PassthroughNode.descriptor(),
        serde_json::json!({}),
        "Forwards every chunk unchanged",
        None,
    );

    registry.register_with_details(
        "core::calculator",
        |params| Ok(Box::new(CalculatorNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| CalculatorNode::from_params(&serde_json::json!({"op": "add", "value": 0.0}))),
        schema_of::<calculator::CalculatorParams>(),
        "Applies a configured arithmetic operation to JSON values",
        None,
    );

    registry.register_with_details(
        "core::expander",
        |params| Ok(Box::new(ExpanderNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| ExpanderNode::from_params(&serde_json::json!({}))),
        schema_of::<expander::ExpanderParams>(),
        "Emits a configured number of outputs per input chunk",
        None,
    );

    registry.register_with_details(
        "media::sync_av",
        |params| Ok(Box::new(SyncAvNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| SyncAvNode::from_params(&serde_json::json!({}))),
        schema_of::<sync_av::SyncAvParams>(),
        "Reports audio/video timestamp drift for jointly-delivered chunks",
        None,
    );

    registry.register_with_details(
        "audio::gain",
        |params| Ok(Box::new(AudioGainNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| AudioGainNode::from_params(&serde_json::json!({"gain": 1.0}))),
        schema_of::<audio_gain::GainParams>(),
        "Applies a fixed linear gain to f32 audio",
        None,
    );

    registry.register_with_details(
        "audio::chunker",
        |params| Ok(Box::new(AudioChunkerNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| AudioChunkerNode::from_params(&serde_json::json!({}))),
        schema_of::<audio_chunker::AudioChunkerParams>(),
        "Re-frames audio into fixed-duration frames",
        None,
    );

    registry.register_with_details(
        "text::chunker",
        |params| Ok(Box::new(TextChunkerNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| TextChunkerNode::from_params(&serde_json::json!({}))),
        schema_of::<text_chunker::TextChunkerParams>(),
        "Splits text into bounded pieces on whitespace",
        None,
    );

    registry.register_with_details(
        "ipc::worker",
        |params| Ok(Box::new(WorkerNode::from_params(params)?) as Box<dyn PipelineNode>),
        descriptor_of(|| WorkerNode::from_params(&serde_json::json!({}))),
        schema_of::<worker::WorkerParams>(),
        "Bridges a pipeline position to an out-of-process worker over shared memory",
        None,
    );
}

/// Descriptor of a default-constructed instance. Registration is the one
/// place a throwaway instance is acceptable; construction with default
/// params must not fail.
fn descriptor_of<N, F>(make: F) -> mediaflux_core::NodeDescriptor
where
    N: PipelineNode,
    F: Fn() -> mediaflux_core::Result<N>,
{
    #[allow(clippy::expect_used)]
    make().expect("default construction of a builtin node").descriptor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtins_exposes_catalog() {
        let mut registry = NodeRegistry::new();
        register_builtins(&mut registry);

        assert!(registry.contains("core::calculator"));
        assert!(registry.contains("media::sync_av"));
        assert!(registry.contains("ipc::worker"));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 8);

        let sync = defs.iter().find(|d| d.name == "media::sync_av").expect("sync_av");
        assert_eq!(sync.input_kinds.len(), 2);
        assert!(!sync.streaming);

        let expander = defs.iter().find(|d| d.name == "core::expander").expect("expander");
        assert!(expander.streaming);
    }

    #[test]
    fn test_factories_validate_params() {
        let mut registry = NodeRegistry::new();
        register_builtins(&mut registry);

        assert!(registry
            .create("core::calculator", &serde_json::json!({"op": "add", "value": 5.0}))
            .is_ok());
        assert!(registry.create("core::calculator", &serde_json::json!({"op": "nope"})).is_err());
    }
}
