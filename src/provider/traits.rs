//! Traits and types for transfer providers

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{ProgressNotification, TaskMeta};

/// Callback a provider invokes with every progress notification
pub type ProgressCallback = Arc<dyn Fn(ProgressNotification) + Send + Sync>;

/// Everything a provider needs to perform one transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferParams {
    /// Remote URL
    pub url: String,
    /// File name inside `dir`
    pub file_name: String,
    /// Destination directory
    pub dir: PathBuf,
    /// Declared size in bytes (0 = unknown)
    pub total_size: u64,
}

impl TransferParams {
    /// Full path of the file being written
    pub fn target_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl From<&TaskMeta> for TransferParams {
    fn from(meta: &TaskMeta) -> Self {
        Self {
            url: meta.params.url.clone(),
            file_name: meta.params.file_name.clone(),
            dir: meta.resolved_dir.clone(),
            total_size: meta.params.total_size,
        }
    }
}

/// Static description of a provider backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Registry id (e.g. "http")
    pub id: String,
    /// Whether providers from this backend can pause mid-transfer
    pub allow_pause: bool,
    /// Human-readable description
    pub description: String,
}

/// A single transfer, owned by one task
///
/// The orchestrator calls `init` once before admission and `start` once per
/// run. `pause` and `resume` are only called when [`allow_pause`] is true;
/// the default implementations answer with [`Error::NotSupported`].
///
/// [`allow_pause`]: Provider::allow_pause
#[async_trait]
pub trait Provider: Send + Sync {
    /// Whether `pause` can interrupt a running transfer
    fn allow_pause(&self) -> bool;

    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Prepare backend state before the task is admitted
    ///
    /// # Errors
    ///
    /// Returns an error if remote metadata cannot be resolved or the target
    /// directory cannot be created.
    async fn init(&self) -> Result<()>;

    /// Perform the transfer
    ///
    /// Resolves once the transfer finished or failed. A paused transfer keeps
    /// this call pending until it is resumed or removed.
    async fn start(&self) -> Result<()>;

    /// Suspend the running transfer
    async fn pause(&self) -> Result<()> {
        Err(Error::NotSupported(format!(
            "provider {} cannot pause a running transfer",
            self.name()
        )))
    }

    /// Resume a paused transfer; progress continues through the same callback
    async fn resume(&self) -> Result<()> {
        Err(Error::NotSupported(format!(
            "provider {} cannot resume a transfer",
            self.name()
        )))
    }

    /// Release backend resources and abort any running transfer
    ///
    /// Best effort; callers log failures and carry on.
    async fn remove(&self) -> Result<()>;
}

/// Factory for [`Provider`]s, registered in the
/// [`ProviderRegistry`](super::ProviderRegistry) under an id
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Describe this backend
    fn info(&self) -> ProviderInfo;

    /// One-time warm-up, run before the first provider is created
    ///
    /// The registry runs this at most once successfully per backend id.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Create a provider for one transfer
    fn create(&self, params: TransferParams, on_progress: ProgressCallback) -> Arc<dyn Provider>;
}
