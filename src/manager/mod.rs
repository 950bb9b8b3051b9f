//! Application-facing download manager.
//!
//! `DownloadManager` owns the collaborators every task shares and creates the
//! tasks themselves. Its methods are organized by concern:
//! - this module - construction, task creation and lookup, events
//! - [`config_ops`] - runtime configuration updates

mod config_ops;


use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::cache::{CacheProbe, FsCacheProbe};
use crate::config::{Config, ConfigHandle};
use crate::error::{Error, Result};
use crate::integrity::{ChecksumValidator, IntegrityValidator};
use crate::pool::{AdmissionPool, PoolEntry};
use crate::provider::{ProviderInfo, ProviderRegistry};
use crate::task::{DownloadTask, TaskContext};
use crate::types::{Command, PoolStats, TaskEvent, TaskId, TaskParams, next_task_id};
use crate::utils::file_name_from_url;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Entry point of the library
///
/// Cloning is cheap; all clones share the same pool, registry and tasks.
///
/// # Examples
///
/// ```no_run
/// use taskfetch::{Config, DownloadManager, TaskParams};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = DownloadManager::new(Config::default())?;
///
///     let mut events = manager.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             tracing::info!(task_id = %event.id, state = %event.update.state.kind(), "task event");
///         }
///     });
///
///     let task = manager.create_task(TaskParams {
///         url: "https://example.com/tool.7z".into(),
///         file_name: "tool.7z".into(),
///         total_size: 0,
///         integrity: None,
///     });
///     task.start().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DownloadManager {
    ctx: TaskContext,
    tasks: Arc<RwLock<HashMap<TaskId, DownloadTask>>>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl DownloadManager {
    /// Create a manager with the built-in providers and collaborators
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration, or an error if
    /// the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = ProviderRegistry::with_defaults(&config.download)?;
        let validator: Arc<dyn IntegrityValidator> = Arc::new(ChecksumValidator::new());
        let cache: Arc<dyn CacheProbe> = Arc::new(FsCacheProbe::new(validator.clone()));
        Self::with_collaborators(config, registry, cache, validator)
    }

    /// Create a manager with caller-supplied collaborators
    pub fn with_collaborators(
        config: Config,
        registry: ProviderRegistry,
        cache: Arc<dyn CacheProbe>,
        validator: Arc<dyn IntegrityValidator>,
    ) -> Result<Self> {
        config.validate()?;
        let config = ConfigHandle::new(config);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            providers = ?registry.list().iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            max_downloading_tasks = config.max_downloading_tasks(),
            "download manager created"
        );

        Ok(Self {
            ctx: TaskContext {
                pool: AdmissionPool::new(config.clone()),
                config,
                registry: Arc::new(registry),
                cache,
                validator,
            },
            tasks: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        })
    }

    /// Create an unstarted task
    ///
    /// An empty `file_name` is derived from the URL. Every transition of the
    /// task is broadcast on the [`subscribe`](Self::subscribe) channel.
    pub fn create_task(&self, mut params: TaskParams) -> DownloadTask {
        if params.file_name.trim().is_empty() {
            params.file_name = file_name_from_url(&params.url);
        }

        let provider = self.ctx.config.snapshot().download.provider;
        let id = next_task_id(Some(&provider));
        let task = DownloadTask::new(id.clone(), params, self.ctx.clone());

        let event_tx = self.event_tx.clone();
        let event_id = id.clone();
        task.listen(Arc::new(move |update| {
            // No receivers is fine; the event is dropped.
            event_tx
                .send(TaskEvent {
                    id: event_id.clone(),
                    update: update.clone(),
                    at: Utc::now(),
                })
                .ok();
        }));

        self.tasks_mut().insert(id.clone(), task.clone());
        tracing::debug!(task_id = %id, url = %task.params().url, "task created");
        task
    }

    /// Look up a task created by this manager
    pub fn get_task(&self, id: &TaskId) -> Option<DownloadTask> {
        self.tasks_ref().get(id).cloned()
    }

    /// Send a command to a task by id
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id, otherwise whatever
    /// [`DownloadTask::command`] returns.
    pub async fn command(
        &self,
        id: &TaskId,
        command: Command,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let task = self
            .get_task(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        task.command(command, payload).await
    }

    /// Snapshots of every started task, oldest first
    pub fn tasks(&self) -> Vec<PoolEntry> {
        self.ctx.pool.entries()
    }

    /// Forget a finished task
    ///
    /// Removes the pool entry and the task handle. Tasks that never started or
    /// ended in `completed`/`error` can be removed; running ones must be
    /// canceled first.
    pub fn remove_task(&self, id: &TaskId) -> Result<()> {
        let task = self
            .get_task(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let Some(kind) = task.kind()
            && !kind.is_terminal()
        {
            return Err(Error::NotSupported(format!(
                "task {} is {}; cancel it before removing",
                id, kind
            )));
        }

        self.ctx.pool.remove(id);
        self.tasks_mut().remove(id);
        tracing::debug!(task_id = %id, "task removed");
        Ok(())
    }

    /// Admission pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.ctx.pool.stats()
    }

    /// Registered provider backends
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.ctx.registry.list()
    }

    /// Subscribe to task events
    ///
    /// Slow receivers may lag; see [`broadcast::Receiver::recv`].
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    /// Task events as a stream, skipping over lag gaps
    pub fn event_stream(&self) -> impl Stream<Item = TaskEvent> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged, events dropped");
                None
            }
        })
    }

    fn tasks_ref(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaskId, DownloadTask>> {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TaskId, DownloadTask>> {
        self.tasks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("tasks", &self.tasks_ref().len())
            .field("pool", &self.ctx.pool.stats())
            .finish()
    }
}
