// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mediaflux_core::registry::NodeRegistry;
use mediaflux_engine::Runtime;
use mediaflux_server::{config::ServerConfig, logging, server, state::AppState};

#[derive(Debug, Parser)]
#[command(name = "fluxd", about = "MediaFlux streaming pipeline runtime", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listening endpoint.
    #[arg(long)]
    listen: Option<String>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // The scheduler's cooperative pool is sized to the host unless pinned;
    // the blocking pool (inference, codec work) is always bounded.
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.engine.worker_threads > 0 {
        builder.worker_threads(config.engine.worker_threads);
    }
    builder.max_blocking_threads(config.engine.blocking_threads);
    let runtime = builder.build()?;

    runtime.block_on(async move {
        let _log_guard = logging::init_logging(&config.log)
            .map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;

        let mut registry = NodeRegistry::new();
        mediaflux_nodes::register_builtins(&mut registry);
        tracing::info!(nodes = registry.len(), "builtin catalog registered");

        let flux = Arc::new(Runtime::with_registry(registry, config.runtime_config()));
        server::serve(&config.listen_addr, AppState::new(flux)).await
    })
}
