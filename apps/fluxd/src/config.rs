// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Layered server configuration: built-in defaults, an optional TOML file,
//! then `FLUXD_`-prefixed environment variables, last wins.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use mediaflux_core::capability::{HostCapabilities, HostGpu};
use mediaflux_engine::{CompilerConfig, RuntimeConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};

/// Engine tuning exposed to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling for one node `process` call, in milliseconds.
    pub per_call_timeout_ms: u64,
    /// Drain window on session teardown, in milliseconds.
    pub drain_window_ms: u64,
    /// Default inbound-queue depth per node.
    pub queue_capacity: usize,
    /// Collector/reply channel capacity per sink.
    pub reply_capacity: usize,
    /// Tokio worker threads. 0 means one per CPU.
    pub worker_threads: usize,
    /// Bound of the blocking pool that runs model inference and codec work.
    pub blocking_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_call_timeout_ms: 30_000,
            drain_window_ms: 5_000,
            queue_capacity: 64,
            reply_capacity: 64,
            worker_threads: 0,
            blocking_threads: 32,
        }
    }
}

/// Host capabilities the operator declares for the admission gate. CPU
/// cores are probed, not configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    pub memory_gb: f64,
    #[serde(default)]
    pub gpus: Vec<GpuConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    pub kind: String,
    pub memory_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level when RUST_LOG is not set.
    pub level: String,
    pub file_enable: bool,
    pub file_path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file_enable: false, file_path: "logs/fluxd.log".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening endpoint for the session and catalog endpoints.
    pub listen_addr: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8090".to_string(),
            engine: EngineConfig::default(),
            host: HostConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults < TOML file < environment.
    ///
    /// # Errors
    ///
    /// Figment extraction errors (bad file, malformed value).
    pub fn load(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("FLUXD_").split("__")).extract()
    }

    /// The engine-facing view of this configuration.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            scheduler: SchedulerConfig {
                per_call_timeout: Duration::from_millis(self.engine.per_call_timeout_ms),
                drain_window: Duration::from_millis(self.engine.drain_window_ms),
                reply_capacity: self.engine.reply_capacity,
            },
            compiler: CompilerConfig {
                default_queue_capacity: self.engine.queue_capacity,
                max_queue_capacity: None,
            },
            host: HostCapabilities::detect(
                self.host.memory_gb,
                self.host
                    .gpus
                    .iter()
                    .map(|g| HostGpu { kind: g.kind.clone(), memory_gb: g.memory_gb })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.engine.per_call_timeout_ms, 30_000);
        assert_eq!(config.engine.drain_window_ms, 5_000);
        assert_eq!(config.engine.queue_capacity, 64);

        let runtime = config.runtime_config();
        assert_eq!(runtime.scheduler.per_call_timeout, Duration::from_secs(30));
        assert!(runtime.host.cpu_cores >= 1);
    }

    #[test]
    fn test_default_serializes_to_toml() {
        // Keeps the generated sample config in sync with the struct.
        let toml = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        assert!(toml.contains("listen_addr"));
        assert!(toml.contains("per_call_timeout_ms"));
    }
}
