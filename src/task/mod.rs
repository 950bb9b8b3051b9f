//! Per-task orchestration split into focused submodules.
//!
//! The `DownloadTask` struct and its methods are organized by concern:
//! - [`lifecycle`] - `start()` and the admission/transfer/validation sequence
//! - [`control`] - command dispatch (pause/continue/cancel/retry)
//!
//! A task owns one [`StateMachine`] for its whole life and at most one live
//! [`Provider`]. Commands never interrupt the running sequence directly; they
//! flip flags that the sequence checks at its checkpoints.

mod control;
mod lifecycle;


use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::cache::CacheProbe;
use crate::commands::allowed_commands;
use crate::config::ConfigHandle;
use crate::error::{Error, Result};
use crate::integrity::IntegrityValidator;
use crate::pool::{AdmissionPermit, AdmissionPool};
use crate::provider::{Provider, ProviderRegistry};
use crate::state_machine::StateMachine;
use crate::types::{Command, StateKind, TaskId, TaskMeta, TaskParams, TaskState, TaskUpdate};

/// Callback receiving every transition of a task
pub type TaskListener = Arc<dyn Fn(&TaskUpdate) + Send + Sync>;

/// Shared collaborators handed to every task
#[derive(Clone)]
pub struct TaskContext {
    /// Live configuration, read when a task starts
    pub config: ConfigHandle,
    /// Admission pool shared by all tasks
    pub pool: AdmissionPool,
    /// Provider backends by id
    pub registry: Arc<ProviderRegistry>,
    /// Cache-hit detection
    pub cache: Arc<dyn CacheProbe>,
    /// Post-transfer checksum validation
    pub validator: Arc<dyn IntegrityValidator>,
}

/// Identifies one pass through the admission queue
///
/// `run` changes on every `start()`; `ticket` additionally changes on every
/// `continue`. A sequence whose token is stale steps aside at its checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RunToken {
    run: u64,
    ticket: u64,
}

struct Flags {
    provider_started: AtomicBool,
    /// Provider `start()` returned Ok for the current run
    transfer_done: AtomicBool,
    queuing_paused: AtomicBool,
    canceled: AtomicBool,
    run: AtomicU64,
    ticket: AtomicU64,
}

impl Flags {
    fn new() -> Self {
        Self {
            provider_started: AtomicBool::new(false),
            transfer_done: AtomicBool::new(false),
            queuing_paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            run: AtomicU64::new(0),
            ticket: AtomicU64::new(0),
        }
    }
}

pub(crate) struct TaskInner {
    id: TaskId,
    params: TaskParams,
    ctx: TaskContext,
    machine: StateMachine,
    flags: Flags,
    provider: Mutex<Option<Arc<dyn Provider>>>,
    meta: Mutex<Option<TaskMeta>>,
    permit: Mutex<Option<AdmissionPermit>>,
    listeners: Mutex<Vec<TaskListener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TaskInner {
    fn allow_pause(&self) -> bool {
        lock(&self.provider)
            .as_ref()
            .is_some_and(|provider| provider.allow_pause())
    }

    /// Bridge from the state machine to the pool, the permit and listeners
    fn on_transition(&self, state: &TaskState) {
        let kind = state.kind();
        self.ctx.pool.update(&self.id, state);

        if !matches!(kind, StateKind::Queuing | StateKind::Downloading) {
            let released = lock(&self.permit).take();
            if released.is_some() {
                tracing::debug!(task_id = %self.id, state = %kind, "admission slot released");
            }
        }

        let update = TaskUpdate {
            state: state.clone(),
            allowed_commands: allowed_commands(Some(kind), self.allow_pause()),
        };
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&update))).is_err() {
                tracing::warn!(task_id = %self.id, state = %kind, "task listener panicked");
            }
        }
    }
}

/// One download task
///
/// Cloning is cheap; all clones control the same task.
///
/// # Examples
///
/// ```no_run
/// # use taskfetch::*;
/// # async fn example(manager: DownloadManager) -> Result<()> {
/// let task = manager.create_task(TaskParams {
///     url: "https://example.com/tool.7z".into(),
///     file_name: "tool.7z".into(),
///     total_size: 1_048_576,
///     integrity: None,
/// });
///
/// let runner = task.clone();
/// tokio::spawn(async move { runner.start().await });
///
/// task.command(Command::Pause, None).await?;
/// task.command(Command::Continue, None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadTask {
    inner: Arc<TaskInner>,
}

impl DownloadTask {
    /// Create an unstarted task
    pub fn new(id: TaskId, params: TaskParams, ctx: TaskContext) -> Self {
        let machine = StateMachine::new(id.clone());
        Self {
            inner: Arc::new(TaskInner {
                id,
                params,
                ctx,
                machine,
                flags: Flags::new(),
                provider: Mutex::new(None),
                meta: Mutex::new(None),
                permit: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Task id
    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    /// Parameters the task was created with
    pub fn params(&self) -> &TaskParams {
        &self.inner.params
    }

    /// Current state (None = unstarted)
    pub fn state(&self) -> Option<TaskState> {
        self.inner.machine.state()
    }

    /// Current state type (None = unstarted)
    pub fn kind(&self) -> Option<StateKind> {
        self.inner.machine.kind()
    }

    /// Metadata resolved by the last `start()`
    pub fn meta(&self) -> Option<TaskMeta> {
        lock(&self.inner.meta).clone()
    }

    /// Whether the current provider can pause mid-transfer
    ///
    /// False until a provider has been created.
    pub fn allow_pause(&self) -> bool {
        self.inner.allow_pause()
    }

    /// Commands the task accepts right now
    pub fn allowed_commands(&self) -> Vec<Command> {
        allowed_commands(self.kind(), self.allow_pause())
    }

    /// Register a listener for every subsequent transition
    ///
    /// Listeners stay registered across retries.
    pub fn listen(&self, listener: TaskListener) {
        lock(&self.inner.listeners).push(listener);
    }

    /// Run `start()` on the tokio runtime
    pub fn spawn(&self) -> tokio::task::JoinHandle<Result<()>> {
        let task = self.clone();
        tokio::spawn(async move { task.start().await })
    }

    fn attach_to_machine(&self) {
        let weak: Weak<TaskInner> = Arc::downgrade(&self.inner);
        self.inner.machine.listen(Arc::new(move |state: &TaskState| {
            if let Some(inner) = weak.upgrade() {
                inner.on_transition(state);
            }
        }));
    }

    fn current_provider(&self) -> Result<Arc<dyn Provider>> {
        lock(&self.inner.provider)
            .clone()
            .ok_or_else(|| Error::Other(format!("task {} has no provider", self.inner.id)))
    }

    fn store_permit(&self, permit: AdmissionPermit) {
        *lock(&self.inner.permit) = Some(permit);
    }

    /// Apply a transition the orchestration relies on; an illegal edge here is a bug
    fn transition(&self, apply: impl FnOnce(&StateMachine) -> Result<()>) -> Result<()> {
        apply(&self.inner.machine).inspect_err(|e| {
            tracing::error!(task_id = %self.inner.id, error = %e, "orchestration hit an illegal transition");
        })
    }

    /// Move to `error` with the failure's message and hand the failure back
    fn fail(&self, err: Error) -> Error {
        if self.kind().is_some_and(StateKind::is_terminal) {
            tracing::debug!(task_id = %self.inner.id, error = %err, "failure after task already ended");
            return err;
        }
        tracing::warn!(task_id = %self.inner.id, error = %err, "task failed");
        let _ = self.transition(|m| m.to_error(err.to_string()));
        err
    }

    fn next_run(&self) -> RunToken {
        let flags = &self.inner.flags;
        RunToken {
            run: flags.run.fetch_add(1, Ordering::SeqCst) + 1,
            ticket: flags.ticket.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn next_ticket(&self, token: RunToken) -> RunToken {
        RunToken {
            run: token.run,
            ticket: self.inner.flags.ticket.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn current_token(&self) -> RunToken {
        RunToken {
            run: self.inner.flags.run.load(Ordering::SeqCst),
            ticket: self.inner.flags.ticket.load(Ordering::SeqCst),
        }
    }

    /// Whether a sequence holding `token` was canceled or overtaken
    fn run_superseded(&self, token: RunToken) -> bool {
        let flags = &self.inner.flags;
        flags.canceled.load(Ordering::SeqCst)
            || flags.run.load(Ordering::SeqCst) != token.run
    }

    /// Post-admission checkpoint
    fn admission_superseded(&self, token: RunToken) -> bool {
        self.run_superseded(token)
            || self.inner.flags.queuing_paused.load(Ordering::SeqCst)
            || self.inner.flags.ticket.load(Ordering::SeqCst) != token.ticket
            || self.kind() != Some(StateKind::Queuing)
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.inner.id)
            .field("state", &self.kind())
            .field("url", &self.inner.params.url)
            .finish()
    }
}
