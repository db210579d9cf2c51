// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared model weights, deduplicated across same-type nodes in a process.
//!
//! Loading model weights is the dominant startup cost for ML nodes, so the
//! store deduplicates them by `(model identity, device)`. The store holds
//! only weak references: an entry lives exactly as long as some node holds
//! the returned `Arc`, and a later `get_or_load` after all holders dropped
//! loads the model again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::error::{FluxError, Result};

/// A loaded model shareable between node instances.
pub trait SharedModel: Send + Sync {
    /// Approximate memory footprint, for logging and diagnostics.
    fn size_bytes(&self) -> usize;
}

/// Identity of one loaded model: what it is and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    /// Model identity, e.g. a path or content hash.
    pub identity: String,
    /// Target device, e.g. "cpu", "cuda:0".
    pub device: String,
}

impl ModelKey {
    pub fn new(identity: impl Into<String>, device: impl Into<String>) -> Self {
        Self { identity: identity.into(), device: device.into() }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.identity, self.device)
    }
}

/// Weak-reference cache of loaded models.
#[derive(Default)]
pub struct ModelStore {
    models: Mutex<HashMap<ModelKey, Weak<dyn SharedModel>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live model for `key`, or load it with `loader`.
    ///
    /// The loader runs at most once per generation of the entry; concurrent
    /// callers for the same key serialize on the store lock.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error unchanged.
    pub async fn get_or_load<F, Fut>(&self, key: ModelKey, loader: F) -> Result<Arc<dyn SharedModel>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn SharedModel>>>,
    {
        let mut models = self.models.lock().await;

        if let Some(model) = models.get(&key).and_then(Weak::upgrade) {
            tracing::debug!(model = %key, "reusing shared model");
            return Ok(model);
        }

        let model = loader().await?;
        tracing::info!(model = %key, size_bytes = model.size_bytes(), "loaded shared model");
        models.insert(key, Arc::downgrade(&model));

        // Opportunistically drop entries whose holders are all gone.
        models.retain(|_, weak| weak.strong_count() > 0);

        Ok(model)
    }

    /// Number of live entries.
    pub async fn live_count(&self) -> usize {
        let models = self.models.lock().await;
        models.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FakeWeights {
        bytes: usize,
    }

    impl SharedModel for FakeWeights {
        fn size_bytes(&self) -> usize {
            self.bytes
        }
    }

    #[tokio::test]
    async fn test_same_key_shares_instance() {
        let store = ModelStore::new();
        let key = ModelKey::new("whisper-small", "cpu");

        let a = store
            .get_or_load(key.clone(), || async {
                Ok(Arc::new(FakeWeights { bytes: 100 }) as Arc<dyn SharedModel>)
            })
            .await
            .unwrap();
        let b = store
            .get_or_load(key, || async {
                panic!("loader must not run for a live entry");
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.live_count().await, 1);
    }

    #[tokio::test]
    async fn test_released_when_no_holder() {
        let store = ModelStore::new();
        let key = ModelKey::new("vad", "cpu");

        let model = store
            .get_or_load(key.clone(), || async {
                Ok(Arc::new(FakeWeights { bytes: 1 }) as Arc<dyn SharedModel>)
            })
            .await
            .unwrap();
        drop(model);
        assert_eq!(store.live_count().await, 0);

        // A later request reloads.
        let mut loaded_again = false;
        let _model = store
            .get_or_load(key, || {
                loaded_again = true;
                async { Ok(Arc::new(FakeWeights { bytes: 2 }) as Arc<dyn SharedModel>) }
            })
            .await
            .unwrap();
        assert!(loaded_again);
    }

    #[tokio::test]
    async fn test_distinct_devices_are_distinct_entries() {
        let store = ModelStore::new();
        let _cpu = store
            .get_or_load(ModelKey::new("llm", "cpu"), || async {
                Ok(Arc::new(FakeWeights { bytes: 1 }) as Arc<dyn SharedModel>)
            })
            .await
            .unwrap();
        let _gpu = store
            .get_or_load(ModelKey::new("llm", "cuda:0"), || async {
                Ok(Arc::new(FakeWeights { bytes: 1 }) as Arc<dyn SharedModel>)
            })
            .await
            .unwrap();
        assert_eq!(store.live_count().await, 2);
    }
}
