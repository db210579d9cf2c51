// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node factory registry and catalog.
//!
//! The registry is the only path by which a manifest's `node_type` string
//! becomes running code: it maps type names to a constructor plus declared
//! metadata. The runtime never evaluates user-supplied source; user
//! extensibility is additional registrations, and those must predate the
//! first session (the owning runtime seals the registry at session start).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityRequirements;
use crate::error::{FluxError, Result};
use crate::manifest::{InputPort, OutputPort};
use crate::node::{NodeDescriptor, PipelineNode};

/// A factory producing a node instance from its manifest `params`.
pub type NodeFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn PipelineNode>> + Send + Sync>;

/// A serializable description of one registered node type, exposed through
/// the GetVersion catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub param_schema: serde_json::Value,
    pub input_kinds: Vec<InputPort>,
    pub output_kinds: Vec<OutputPort>,
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityRequirements>,
}

/// Internal registration record.
#[derive(Clone)]
struct NodeEntry {
    factory: NodeFactory,
    param_schema: serde_json::Value,
    descriptor: NodeDescriptor,
    capabilities: Option<CapabilityRequirements>,
    description: Option<String>,
}

/// Process-wide, read-mostly map from node type name to constructor and
/// metadata.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    entries: HashMap<String, NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type.
    ///
    /// `descriptor` declares the type's ports and streaming classification;
    /// `param_schema` is the JSON schema of the accepted `params` object.
    pub fn register<F>(
        &mut self,
        name: &str,
        factory: F,
        descriptor: NodeDescriptor,
        param_schema: serde_json::Value,
    ) where
        F: Fn(&serde_json::Value) -> Result<Box<dyn PipelineNode>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            NodeEntry {
                factory: Arc::new(factory),
                param_schema,
                descriptor,
                capabilities: None,
                description: None,
            },
        );
    }

    /// Register a node type with a human-readable description and declared
    /// capability requirements.
    pub fn register_with_details<F>(
        &mut self,
        name: &str,
        factory: F,
        descriptor: NodeDescriptor,
        param_schema: serde_json::Value,
        description: impl Into<String>,
        capabilities: Option<CapabilityRequirements>,
    ) where
        F: Fn(&serde_json::Value) -> Result<Box<dyn PipelineNode>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            NodeEntry {
                factory: Arc::new(factory),
                param_schema,
                descriptor,
                capabilities,
                description: Some(description.into()),
            },
        );
    }

    /// Construct a node instance by registered type name.
    ///
    /// # Errors
    ///
    /// [`FluxError::Validation`] if the type is unknown; constructor errors
    /// pass through unchanged.
    pub fn create(&self, name: &str, params: &serde_json::Value) -> Result<Box<dyn PipelineNode>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| FluxError::Validation(format!("unknown node type '{name}'")))?;
        (entry.factory)(params)
    }

    /// The declared descriptor for a type, if registered.
    pub fn descriptor(&self, name: &str) -> Option<&NodeDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Declared capability requirements for a type, if any.
    pub fn capabilities(&self, name: &str) -> Option<&CapabilityRequirements> {
        self.entries.get(name).and_then(|e| e.capabilities.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Catalog of every registered type, sorted by name so the GetVersion
    /// payload is stable across calls.
    pub fn definitions(&self) -> Vec<NodeDefinition> {
        let mut defs: Vec<NodeDefinition> = self
            .entries
            .iter()
            .map(|(name, entry)| NodeDefinition {
                name: name.clone(),
                description: entry.description.clone(),
                param_schema: entry.param_schema.clone(),
                input_kinds: entry.descriptor.inputs.clone(),
                output_kinds: entry.descriptor.outputs.clone(),
                streaming: entry.descriptor.streaming,
                capabilities: entry.capabilities.clone(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}
