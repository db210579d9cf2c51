// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Capability declarations and the host-side admission check.
//!
//! Nodes declare what they need (GPU memory, CPU cores, host memory); the
//! runtime declares what the host offers. The pipeline compiler unions the
//! requirements of every node in a manifest and rejects the manifest at
//! admission when any requirement is unmet, before anything runs.

use serde::{Deserialize, Serialize};

/// GPU requirement of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GpuRequirement {
    /// GPU kind, e.g. "cuda", "rocm", "metal".
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory_gb: Option<f64>,
    /// When false the GPU is a preference, not a gate: admission proceeds
    /// without it and the node falls back (typically to CPU).
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

/// CPU requirement of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CpuRequirement {
    pub cores: u32,
}

/// Requirements a node declares for admission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CapabilityRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
}

impl CapabilityRequirements {
    pub fn is_empty(&self) -> bool {
        self.gpu.is_none() && self.cpu.is_none() && self.memory_gb.is_none()
    }
}

/// A GPU the host offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostGpu {
    pub kind: String,
    pub memory_gb: f64,
}

/// What this host can satisfy.
///
/// CPU count is probed; GPU and memory come from server configuration since
/// the core makes no attempt at device discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    #[serde(default)]
    pub gpus: Vec<HostGpu>,
}

impl HostCapabilities {
    /// Probe the CPU count and take the rest from explicit configuration.
    pub fn detect(memory_gb: f64, gpus: Vec<HostGpu>) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let cpu_cores = num_cpus::get() as u32;
        Self { cpu_cores, memory_gb, gpus }
    }

    /// Check one node's requirements against this host.
    ///
    /// Returns every unmet requirement as a human-readable string, empty
    /// when everything is satisfied.
    pub fn unmet(&self, req: &CapabilityRequirements) -> Vec<String> {
        let mut unmet = Vec::new();

        if let Some(cpu) = &req.cpu {
            if cpu.cores > self.cpu_cores {
                unmet.push(format!(
                    "requires {} CPU cores, host has {}",
                    cpu.cores, self.cpu_cores
                ));
            }
        }

        if let Some(memory_gb) = req.memory_gb {
            if memory_gb > self.memory_gb {
                unmet.push(format!(
                    "requires {memory_gb} GB memory, host has {} GB",
                    self.memory_gb
                ));
            }
        }

        if let Some(gpu) = &req.gpu {
            let satisfied = self.gpus.iter().any(|host_gpu| {
                host_gpu.kind == gpu.kind
                    && gpu.min_memory_gb.is_none_or(|min| host_gpu.memory_gb >= min)
            });
            if !satisfied {
                if gpu.required {
                    unmet.push(match gpu.min_memory_gb {
                        Some(min) => format!("requires {} GPU with >= {min} GB", gpu.kind),
                        None => format!("requires {} GPU", gpu.kind),
                    });
                } else {
                    // An optional GPU never gates admission.
                    tracing::debug!(kind = %gpu.kind, "optional GPU unavailable, admitting anyway");
                }
            }
        }

        unmet
    }
}
