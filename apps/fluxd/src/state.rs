// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use mediaflux_engine::Runtime;

/// Shared server state handed to every handler.
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>) -> Arc<Self> {
        Arc::new(Self { runtime })
    }
}
