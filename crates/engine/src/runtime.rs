// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The runtime handle: owned registry, host capabilities, model store, and
//! the session entry points.
//!
//! Nothing here is global. Sessions borrow from the `Runtime`; dropping it
//! releases everything. The registry is read-mostly: registrations are
//! accepted until the first session starts, after which the registry is
//! sealed and lookups are the only remaining operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use mediaflux_core::capability::HostCapabilities;
use mediaflux_core::error::{FluxError, Result};
use mediaflux_core::manifest::PipelineManifest;
use mediaflux_core::model_store::ModelStore;
use mediaflux_core::node::{NodeDescriptor, PipelineNode};
use mediaflux_core::registry::NodeRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::compiler::{compile, CompilerConfig};
use crate::scheduler::{RunningPipeline, SchedulerConfig, SessionEvent};
use crate::session::{open_session, rejected_session, SessionHandle};
use crate::unary::{run_unary, UnaryOutcome};
use crate::version::{version_info, VersionInfo};

/// Operational configuration of one runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub compiler: CompilerConfig,
    /// What this host offers the capability gate. The default declares no
    /// memory and no GPUs, so manifests requiring either are rejected
    /// until the server configures real values.
    pub host: HostCapabilities,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            compiler: CompilerConfig::default(),
            host: HostCapabilities::detect(0.0, Vec::new()),
        }
    }
}

/// The runtime: one per process (or per test), owning all shared state.
pub struct Runtime {
    registry: RwLock<NodeRegistry>,
    sealed: AtomicBool,
    config: RuntimeConfig,
    models: Arc<ModelStore>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_registry(NodeRegistry::new(), config)
    }

    pub fn with_registry(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        Self {
            registry: RwLock::new(registry),
            sealed: AtomicBool::new(false),
            config,
            models: Arc::new(ModelStore::new()),
        }
    }

    /// Register a node type. Permitted only before the first session.
    ///
    /// # Errors
    ///
    /// [`FluxError::Internal`] once the registry is sealed — late
    /// registrations are a server bug, not a client condition.
    pub fn register<F>(
        &self,
        name: &str,
        factory: F,
        descriptor: NodeDescriptor,
        param_schema: serde_json::Value,
    ) -> Result<()>
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn PipelineNode>> + Send + Sync + 'static,
    {
        if self.sealed.load(Ordering::Acquire) {
            return Err(FluxError::Internal(format!(
                "cannot register '{name}': registry is sealed after the first session"
            )));
        }
        let mut registry = self.registry.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        registry.register(name, factory, descriptor, param_schema);
        Ok(())
    }

    /// True once the first session has started.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn model_store(&self) -> Arc<ModelStore> {
        self.models.clone()
    }

    /// Snapshot of the registry (cheap: factories are refcounted).
    pub fn registry_snapshot(&self) -> NodeRegistry {
        self.registry.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// The GetVersion payload for this runtime.
    pub fn version_info(&self) -> VersionInfo {
        let registry = self.registry.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        version_info(&registry)
    }

    /// Compile a manifest and start a session over it.
    ///
    /// The returned handle's event stream begins with `Ready` on success,
    /// or `Error` followed by `Closed { error }` when the manifest is
    /// rejected or a node fails to initialize. Either way the stream always
    /// ends with `Closed`.
    pub async fn open_session(&self, manifest: &PipelineManifest) -> SessionHandle {
        self.open_session_with_limits(manifest, None).await
    }

    /// [`Runtime::open_session`], honoring a client's requested resource
    /// limits (queue depths clamp downward, never upward).
    pub async fn open_session_with_limits(
        &self,
        manifest: &PipelineManifest,
        limits: Option<&mediaflux_api::ResourceLimits>,
    ) -> SessionHandle {
        self.sealed.store(true, Ordering::Release);
        let session_id = uuid::Uuid::new_v4().to_string();
        let registry = self.registry_snapshot();

        let mut compiler_config = self.config.compiler.clone();
        if let Some(max) = limits.and_then(|l| l.max_queue_depth) {
            compiler_config.max_queue_capacity = Some(
                compiler_config.max_queue_capacity.map_or(max, |existing| existing.min(max)),
            );
            compiler_config.default_queue_capacity =
                compiler_config.default_queue_capacity.min(max);
        }

        let graph =
            match compile(manifest, &registry, &self.config.host, &compiler_config) {
                Ok(graph) => graph,
                Err(report) => {
                    tracing::warn!(session = %session_id, "manifest rejected: {report}");
                    return rejected_session(session_id, report.to_flux_error());
                },
            };

        let (events_tx, events) = mpsc::channel(self.config.scheduler.reply_capacity.max(4));
        let _ = events_tx.try_send(SessionEvent::Ready { session_id: session_id.clone() });

        let stop = CancellationToken::new();
        let pipeline = RunningPipeline::spawn(
            session_id.clone(),
            graph,
            self.config.scheduler.clone(),
            events_tx.clone(),
            stop.clone(),
            self.models.clone(),
        )
        .await;

        match pipeline {
            Ok(pipeline) => open_session(session_id, pipeline, events_tx, events, stop),
            Err(error) => {
                tracing::error!(session = %session_id, %error, "pipeline failed to start");
                rejected_session(session_id, error)
            },
        }
    }

    /// Run a manifest to completion over a batch of inputs and aggregate
    /// the outputs per node: the unary sibling of the streaming session,
    /// with identical semantics and no interleaving.
    ///
    /// # Errors
    ///
    /// Compile failures and fatal node errors; tolerant-node errors are
    /// reported inside the outcome instead (partial success).
    pub async fn execute_unary(
        &self,
        manifest: &PipelineManifest,
        chunks: Vec<mediaflux_core::chunk::DataChunk>,
    ) -> Result<UnaryOutcome> {
        let handle = self.open_session(manifest).await;
        run_unary(handle, chunks).await
    }
}
