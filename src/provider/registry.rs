//! Provider registry: backend lookup by id plus the readiness cache

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::http::HttpBackend;
use super::ranged::RangedHttpBackend;
use super::traits::{ProviderBackend, ProviderInfo};
use crate::config::DownloadConfig;
use crate::error::{Error, Result};

/// Lookup table of provider backends keyed by id
///
/// Resolution is a pure lookup. [`prepare`](Self::prepare) additionally runs
/// the backend's one-time warm-up, at most once successfully per id even when
/// many tasks start at the same time.
#[derive(Default)]
pub struct ProviderRegistry {
    backends: HashMap<String, Arc<dyn ProviderBackend>>,
    readiness: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `http` and `http-ranged` backends
    pub fn with_defaults(config: &DownloadConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(HttpBackend::ID, Arc::new(HttpBackend::new(config)?));
        registry.register(
            RangedHttpBackend::ID,
            Arc::new(RangedHttpBackend::new(config)?),
        );
        Ok(registry)
    }

    /// Register (or replace) a backend under `id`
    pub fn register(&mut self, id: impl Into<String>, backend: Arc<dyn ProviderBackend>) {
        let id = id.into();
        if self.backends.insert(id.clone(), backend).is_some() {
            tracing::debug!(provider = %id, "provider backend replaced");
        }
    }

    /// Look up a backend
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotFound`] for an unknown id.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn ProviderBackend>> {
        self.backends
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(id.to_string()))
    }

    /// Look up a backend and make sure its warm-up has run
    ///
    /// A failed warm-up is not remembered, so the next caller tries again.
    pub async fn prepare(&self, id: &str) -> Result<Arc<dyn ProviderBackend>> {
        let backend = self.resolve(id)?;
        let cell = {
            let mut readiness = self
                .readiness
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            readiness.entry(id.to_string()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            tracing::debug!(provider = %id, "preparing provider backend");
            backend.prepare().await
        })
        .await?;

        Ok(backend)
    }

    /// Whether the backend's warm-up already succeeded
    pub fn is_prepared(&self, id: &str) -> bool {
        self.readiness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .is_some_and(|cell| cell.initialized())
    }

    /// Descriptions of all registered backends, sorted by id
    pub fn list(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<_> = self.backends.values().map(|b| b.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.backends.keys().collect();
        ids.sort();
        f.debug_struct("ProviderRegistry")
            .field("backends", &ids)
            .finish()
    }
}
