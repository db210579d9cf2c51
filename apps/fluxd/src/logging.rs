// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LogConfig;

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn env_filter_or(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging: a console layer always, a non-blocking file layer
/// when enabled. The returned guard must live as long as the process so
/// buffered file output is flushed.
///
/// # Errors
///
/// Returns an error when the log directory cannot be created.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let mut layers: Vec<DynLayer> = Vec::new();
    let mut guard = None;

    layers.push(
        tracing_subscriber::fmt::layer().with_filter(env_filter_or(&config.level)).boxed(),
    );

    if config.file_enable {
        let path = std::path::Path::new(&config.file_path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("fluxd.log"));
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("failed to create log directory {}: {e}", dir.display()))?;

        let appender = tracing_appender::rolling::never(dir, file);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter_or(&config.level))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(guard)
}
