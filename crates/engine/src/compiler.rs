// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The pipeline compiler: manifest in, executable graph or a structured
//! validation report out.
//!
//! Every check runs independently and every failure is reported — a client
//! fixing a manifest sees all of its problems at once, not one per retry.

use std::collections::{HashMap, HashSet, VecDeque};

use mediaflux_core::capability::HostCapabilities;
use mediaflux_core::error::FluxError;
use mediaflux_core::manifest::{
    Connection, NodeManifest, PipelineManifest, CLIENT_ENDPOINT,
};
use mediaflux_core::node::{NodeDescriptor, PipelineNode};
use mediaflux_core::registry::NodeRegistry;
use serde::{Deserialize, Serialize};

use crate::graph::{EdgeTarget, ExecutableGraph, GraphEdge, GraphNode};
use crate::version::is_supported_version;

/// Default bound of a node's inbound queue, overridable per node via
/// `params.queue_capacity` (min 1).
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Machine-readable code of one validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    VersionMismatch,
    UnknownNodeType,
    NodeConfigInvalid,
    CapabilityUnmet,
    Cycle,
    UnknownEndpoint,
    DuplicateNode,
    KindMismatch,
    NoSink,
    AmbiguousPort,
}

/// One validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl ValidationIssue {
    fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), node_id: None }
    }

    fn for_node(code: IssueCode, node_id: &str, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), node_id: Some(node_id.to_string()) }
    }
}

/// Everything wrong with one manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Collapse the report into the taxonomy error that best describes it.
    ///
    /// Version and capability failures keep their dedicated kinds so a
    /// client can distinguish "upgrade" from "find another host" from
    /// "fix the manifest".
    pub fn to_flux_error(&self) -> FluxError {
        let joined =
            self.issues.iter().map(|i| i.message.clone()).collect::<Vec<_>>().join("; ");
        if self.has(IssueCode::VersionMismatch) {
            return FluxError::VersionMismatch {
                requested: self
                    .issues
                    .iter()
                    .find(|i| i.code == IssueCode::VersionMismatch)
                    .map(|i| i.message.clone())
                    .unwrap_or_default(),
                accepted: crate::version::supported_versions().join(", "),
            };
        }
        if self.has(IssueCode::CapabilityUnmet) {
            return FluxError::CapabilityUnmet(joined);
        }
        FluxError::Validation(joined)
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} validation issue(s):", self.issues.len())?;
        for issue in &self.issues {
            write!(f, " [{:?}] {}", issue.code, issue.message)?;
        }
        Ok(())
    }
}

/// Compiler tuning.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub default_queue_capacity: usize,
    /// Ceiling applied over both the default and per-node overrides,
    /// typically from a session's requested resource limits.
    pub max_queue_capacity: Option<usize>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self { default_queue_capacity: DEFAULT_QUEUE_CAPACITY, max_queue_capacity: None }
    }
}

/// Compile a manifest into an executable graph.
///
/// # Errors
///
/// Returns the full [`ValidationReport`] when any check fails. The graph is
/// only built when the report is empty, so a compiled graph implies a fully
/// valid manifest.
pub fn compile(
    manifest: &PipelineManifest,
    registry: &NodeRegistry,
    host: &HostCapabilities,
    config: &CompilerConfig,
) -> Result<ExecutableGraph, ValidationReport> {
    let mut report = ValidationReport::default();

    // 1. Version gate.
    if !is_supported_version(&manifest.protocol_version) {
        report.issues.push(ValidationIssue::new(
            IssueCode::VersionMismatch,
            manifest.protocol_version.clone(),
        ));
    }

    // 2. Duplicate node ids.
    let mut seen = HashSet::new();
    for node in &manifest.nodes {
        if !seen.insert(node.id.as_str()) {
            report.issues.push(ValidationIssue::for_node(
                IssueCode::DuplicateNode,
                &node.id,
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }
    if manifest.nodes.is_empty() {
        report.issues.push(ValidationIssue::new(
            IssueCode::NodeConfigInvalid,
            "manifest contains no nodes",
        ));
    }

    // 3. Instantiate every node through the registry.
    let mut instances: HashMap<&str, (Box<dyn PipelineNode>, NodeDescriptor)> = HashMap::new();
    for node in &manifest.nodes {
        if instances.contains_key(node.id.as_str()) {
            continue; // duplicate, already reported
        }
        if !registry.contains(&node.node_type) {
            report.issues.push(ValidationIssue::for_node(
                IssueCode::UnknownNodeType,
                &node.id,
                format!("unknown node type '{}'", node.node_type),
            ));
            continue;
        }
        match registry.create(&node.node_type, &node.params) {
            Ok(instance) => {
                let descriptor = instance.descriptor();
                check_declared_ports(node, &descriptor, &mut report);
                instances.insert(node.id.as_str(), (instance, descriptor));
            },
            Err(e) => {
                report.issues.push(ValidationIssue::for_node(
                    IssueCode::NodeConfigInvalid,
                    &node.id,
                    format!("constructor for '{}' rejected params: {e}", node.node_type),
                ));
            },
        }
    }

    // 4. Capability admission, over the union of all declared requirements.
    for node in &manifest.nodes {
        let declared = node
            .capability_requirements
            .as_ref()
            .or_else(|| registry.capabilities(&node.node_type));
        let instance_req =
            instances.get(node.id.as_str()).and_then(|(i, _)| i.capability_requirements());
        for req in declared.cloned().into_iter().chain(instance_req) {
            for unmet in host.unmet(&req) {
                report.issues.push(ValidationIssue::for_node(
                    IssueCode::CapabilityUnmet,
                    &node.id,
                    format!("node '{}': {unmet}", node.id),
                ));
            }
        }
    }

    // 5. Topology: dangling endpoints, then cycles over the valid edges.
    let node_ids: HashSet<&str> = manifest.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut valid_edges: Vec<&Connection> = Vec::new();
    for conn in &manifest.connections {
        let mut ok = true;
        if !node_ids.contains(conn.from_node.as_str()) {
            report.issues.push(ValidationIssue::new(
                IssueCode::UnknownEndpoint,
                format!("connection references unknown source node '{}'", conn.from_node),
            ));
            ok = false;
        }
        if !conn.is_client_edge() && !node_ids.contains(conn.to_node.as_str()) {
            report.issues.push(ValidationIssue::new(
                IssueCode::UnknownEndpoint,
                format!("connection references unknown target node '{}'", conn.to_node),
            ));
            ok = false;
        }
        if ok {
            valid_edges.push(conn);
        }
    }

    let topo_order = match topological_order(&manifest.nodes, &valid_edges) {
        Ok(order) => order,
        Err(cycle_members) => {
            report.issues.push(ValidationIssue::new(
                IssueCode::Cycle,
                format!("pipeline contains a cycle through: {}", cycle_members.join(", ")),
            ));
            Vec::new()
        },
    };

    // 6. Kind compatibility per node-to-node edge; port resolution for all.
    let mut edges_by_node: HashMap<&str, Vec<GraphEdge>> = HashMap::new();
    for conn in &valid_edges {
        let Some((_, from_desc)) = instances.get(conn.from_node.as_str()) else {
            continue; // instantiation already failed and was reported
        };

        let Some(output) = resolve_output_port(conn, from_desc, &mut report) else {
            continue;
        };

        let target = if conn.is_client_edge() {
            EdgeTarget::Client
        } else {
            let Some((_, to_desc)) = instances.get(conn.to_node.as_str()) else {
                continue;
            };
            let Some(input) = resolve_input_port(conn, to_desc, &mut report) else {
                continue;
            };

            // Compatibility is a non-empty intersection of produced and
            // accepted kinds.
            let compatible = output.kinds.iter().any(|k| input.kinds.contains(k));
            if !compatible {
                report.issues.push(ValidationIssue::new(
                    IssueCode::KindMismatch,
                    format!(
                        "incompatible connection {}.{} (produces {}) -> {}.{} (accepts {})",
                        conn.from_node,
                        output.name,
                        kinds_list(&output.kinds),
                        conn.to_node,
                        input.name,
                        kinds_list(&input.kinds),
                    ),
                ));
                continue;
            }

            let named_input =
                if to_desc.is_multi_input() { Some(input.name.clone()) } else { None };
            EdgeTarget::Node { id: conn.to_node.clone(), input: named_input }
        };

        edges_by_node
            .entry(conn.from_node.as_str())
            .or_default()
            .push(GraphEdge { output: output.name.clone(), target });
    }

    // 7. Sink inference: no outbound edges, or outbound edges only to the
    // client, makes a node terminal. Nodes with no edges at all forward
    // every declared output to the client.
    let mut graph_nodes: Vec<GraphNode> = Vec::new();
    let mut have_sink = false;
    for node in &manifest.nodes {
        let Some((instance, descriptor)) = instances.remove(node.id.as_str()) else {
            continue;
        };
        let mut edges = edges_by_node.remove(node.id.as_str()).unwrap_or_default();
        let is_sink = edges.iter().all(|e| e.target == EdgeTarget::Client);
        if edges.is_empty() {
            for port in &descriptor.outputs {
                edges.push(GraphEdge { output: port.name.clone(), target: EdgeTarget::Client });
            }
        }
        have_sink |= is_sink;

        graph_nodes.push(GraphNode {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            instance,
            descriptor,
            queue_capacity: queue_capacity(node, config),
            edges,
            is_sink,
            tolerant: node.tolerant,
        });
    }
    if !have_sink && report.is_empty() {
        report.issues.push(ValidationIssue::new(
            IssueCode::NoSink,
            "pipeline has no terminal sink: every node feeds another node",
        ));
    }

    if !report.is_empty() {
        tracing::debug!(issues = report.issues.len(), "manifest rejected: {report}");
        return Err(report);
    }

    let mut nodes = indexmap::IndexMap::new();
    for node in graph_nodes {
        nodes.insert(node.id.clone(), node);
    }
    tracing::info!(
        nodes = nodes.len(),
        connections = manifest.connections.len(),
        "compiled pipeline '{}'",
        manifest.metadata.name
    );
    Ok(ExecutableGraph { nodes, topo_order })
}

/// The per-node queue bound: `params.queue_capacity`, clamped to >= 1 and
/// below the session ceiling when one is set.
fn queue_capacity(node: &NodeManifest, config: &CompilerConfig) -> usize {
    let requested = node
        .params
        .get("queue_capacity")
        .and_then(serde_json::Value::as_u64)
        .map_or(config.default_queue_capacity, |v| usize::try_from(v).unwrap_or(usize::MAX));
    let capped = config.max_queue_capacity.map_or(requested, |max| requested.min(max));
    capped.max(1)
}

/// Cross-check manifest-declared ports against the instance descriptor.
fn check_declared_ports(
    node: &NodeManifest,
    descriptor: &NodeDescriptor,
    report: &mut ValidationReport,
) {
    for declared in &node.input_kinds {
        let matches = descriptor
            .inputs
            .iter()
            .any(|p| p.name == declared.name && p.kinds == declared.kinds);
        if !matches {
            report.issues.push(ValidationIssue::for_node(
                IssueCode::NodeConfigInvalid,
                &node.id,
                format!(
                    "declared input '{}' does not match node type '{}'",
                    declared.name, node.node_type
                ),
            ));
        }
    }
    for declared in &node.output_kinds {
        let matches = descriptor
            .outputs
            .iter()
            .any(|p| p.name == declared.name && p.kinds == declared.kinds);
        if !matches {
            report.issues.push(ValidationIssue::for_node(
                IssueCode::NodeConfigInvalid,
                &node.id,
                format!(
                    "declared output '{}' does not match node type '{}'",
                    declared.name, node.node_type
                ),
            ));
        }
    }
    if node.is_streaming != descriptor.streaming {
        report.issues.push(ValidationIssue::for_node(
            IssueCode::NodeConfigInvalid,
            &node.id,
            format!(
                "manifest marks node as {} but type '{}' is {}",
                streaming_word(node.is_streaming),
                node.node_type,
                streaming_word(descriptor.streaming),
            ),
        ));
    }
}

fn kinds_list(kinds: &[mediaflux_core::buffer::BufferKind]) -> String {
    kinds.iter().map(ToString::to_string).collect::<Vec<_>>().join("|")
}

const fn streaming_word(streaming: bool) -> &'static str {
    if streaming {
        "streaming"
    } else {
        "unary"
    }
}

fn resolve_output_port<'d>(
    conn: &Connection,
    desc: &'d NodeDescriptor,
    report: &mut ValidationReport,
) -> Option<&'d mediaflux_core::manifest::OutputPort> {
    match &conn.from_output {
        Some(name) => {
            let port = desc.outputs.iter().find(|p| &p.name == name);
            if port.is_none() {
                report.issues.push(ValidationIssue::new(
                    IssueCode::UnknownEndpoint,
                    format!("node '{}' has no output port '{name}'", conn.from_node),
                ));
            }
            port
        },
        None if desc.outputs.len() == 1 => desc.outputs.first(),
        None => {
            report.issues.push(ValidationIssue::new(
                IssueCode::AmbiguousPort,
                format!(
                    "node '{}' has {} output ports, connection must name one",
                    conn.from_node,
                    desc.outputs.len()
                ),
            ));
            None
        },
    }
}

fn resolve_input_port<'d>(
    conn: &Connection,
    desc: &'d NodeDescriptor,
    report: &mut ValidationReport,
) -> Option<&'d mediaflux_core::manifest::InputPort> {
    match &conn.to_input {
        Some(name) => {
            let port = desc.inputs.iter().find(|p| &p.name == name);
            if port.is_none() {
                report.issues.push(ValidationIssue::new(
                    IssueCode::UnknownEndpoint,
                    format!("node '{}' has no input port '{name}'", conn.to_node),
                ));
            }
            port
        },
        None if desc.inputs.len() == 1 => desc.inputs.first(),
        None => {
            report.issues.push(ValidationIssue::new(
                IssueCode::AmbiguousPort,
                format!(
                    "node '{}' has {} input ports, connection must name one",
                    conn.to_node,
                    desc.inputs.len()
                ),
            ));
            None
        },
    }
}

/// Kahn's algorithm over the node-to-node edges. Client edges do not
/// participate. On a cycle, returns the ids of the nodes inside it.
fn topological_order(
    nodes: &[NodeManifest],
    edges: &[&Connection],
) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in edges {
        if conn.to_node == CLIENT_ENDPOINT {
            continue;
        }
        adjacency.entry(conn.from_node.as_str()).or_default().push(conn.to_node.as_str());
        if let Some(d) = indegree.get_mut(conn.to_node.as_str()) {
            *d += 1;
        }
    }

    // Seed queue in manifest order so the result is deterministic. Duplicate
    // ids (already reported elsewhere) must not be seeded twice.
    let mut seeded = HashSet::new();
    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| indegree[id] == 0 && seeded.insert(*id))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for next in adjacency.get(id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(d) = indegree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() == indegree.len() {
        Ok(order)
    } else {
        let mut stuck: Vec<String> = indegree
            .iter()
            .filter(|(id, _)| !order.iter().any(|o| o == *id))
            .map(|(id, _)| (*id).to_string())
            .collect();
        stuck.sort();
        Err(stuck)
    }
}
