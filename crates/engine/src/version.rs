// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Protocol version gate and the GetVersion payload.

use mediaflux_core::registry::{NodeDefinition, NodeRegistry};
use serde::{Deserialize, Serialize};

/// Protocol versions this runtime accepts. The IPC wire format is ABI per
/// version: any layout change lands here as a new entry.
const SUPPORTED_VERSIONS: &[&str] = &["v1"];

pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

pub fn supported_versions() -> Vec<String> {
    SUPPORTED_VERSIONS.iter().map(ToString::to_string).collect()
}

/// The GetVersion response: what this runtime speaks and which nodes it can
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub protocol_versions: Vec<String>,
    pub nodes: Vec<NodeDefinition>,
    pub build_fingerprint: String,
}

/// Assemble the GetVersion payload from a registry snapshot.
pub fn version_info(registry: &NodeRegistry) -> VersionInfo {
    VersionInfo {
        protocol_versions: supported_versions(),
        nodes: registry.definitions(),
        build_fingerprint: build_fingerprint(),
    }
}

/// Crate version plus the build sha when the build system provides one.
pub fn build_fingerprint() -> String {
    let sha = option_env!("MEDIAFLUX_BUILD_SHA").unwrap_or("dev");
    format!("{}+{sha}", env!("CARGO_PKG_VERSION"))
}
