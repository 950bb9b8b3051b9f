//! Per-task lifecycle state machine
//!
//! Holds the authoritative state of one task and broadcasts every transition
//! to registered listeners, synchronously and in registration order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::types::{ProgressNotification, StateKind, TaskId, TaskState};

/// Callback invoked with the new state after every transition
pub type StateListener = Arc<dyn Fn(&TaskState) + Send + Sync>;

struct Inner {
    state: Option<TaskState>,
    listeners: Vec<StateListener>,
}

/// Lifecycle state holder for a single task
///
/// Transitions follow [`StateKind::can_transition`]. An illegal edge is a
/// programming error: it is rejected with [`Error::IllegalTransition`] and the
/// stored state is left untouched.
pub struct StateMachine {
    id: TaskId,
    inner: Mutex<Inner>,
}

impl StateMachine {
    /// Create an unstarted state machine
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                state: None,
                listeners: Vec::new(),
            }),
        }
    }

    /// Task this state machine belongs to
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Snapshot of the current state (None = unstarted)
    pub fn state(&self) -> Option<TaskState> {
        self.lock().state.clone()
    }

    /// Current state type (None = unstarted)
    pub fn kind(&self) -> Option<StateKind> {
        self.lock().state.as_ref().map(TaskState::kind)
    }

    /// Register a listener for all subsequent transitions
    pub fn listen(&self, listener: StateListener) {
        self.lock().listeners.push(listener);
    }

    /// Detach every listener
    pub fn remove_listeners(&self) {
        self.lock().listeners.clear();
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Return to the unstarted state without notifying anyone
    ///
    /// Used by retry to start a fresh run under the same task id.
    pub fn reset(&self) {
        self.lock().state = None;
    }

    /// Enter `queuing`
    pub fn to_queuing(&self) -> Result<()> {
        self.transition(TaskState::Queuing)
    }

    /// Enter (or refresh) `downloading` with the latest progress
    pub fn to_downloading(&self, progress: ProgressNotification) -> Result<()> {
        self.transition(TaskState::Downloading(progress))
    }

    /// Record progress, but only while the task is queuing or downloading
    ///
    /// Returns `false` without notifying anyone in any other state, so a
    /// notification that arrives after a pause or cancel cannot revive the task.
    pub fn to_downloading_if_active(&self, progress: ProgressNotification) -> Result<bool> {
        self.transition_if(TaskState::Downloading(progress), |from| {
            matches!(from, Some(StateKind::Queuing | StateKind::Downloading))
        })
    }

    /// Enter `paused`
    pub fn to_paused(&self) -> Result<()> {
        self.transition(TaskState::Paused)
    }

    /// Enter `validating`
    pub fn to_validating(&self) -> Result<()> {
        self.transition(TaskState::Validating)
    }

    /// Enter `completed`
    pub fn to_completed(&self) -> Result<()> {
        self.transition(TaskState::Completed)
    }

    /// Enter `error` with a human-readable message
    pub fn to_error(&self, message: impl Into<String>) -> Result<()> {
        self.transition(TaskState::Error(message.into()))
    }

    fn transition(&self, next: TaskState) -> Result<()> {
        self.transition_if(next, |_| true).map(|_| ())
    }

    fn transition_if(
        &self,
        next: TaskState,
        guard: impl FnOnce(Option<StateKind>) -> bool,
    ) -> Result<bool> {
        // Listeners run outside the lock so they may read the state machine.
        let listeners = {
            let mut inner = self.lock();
            let from = inner.state.as_ref().map(TaskState::kind);
            if !guard(from) {
                return Ok(false);
            }
            let to = next.kind();
            if !StateKind::can_transition(from, to) {
                return Err(Error::IllegalTransition { from, to });
            }
            inner.state = Some(next.clone());
            inner.listeners.clone()
        };

        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(&next))).is_err() {
                tracing::warn!(
                    task_id = %self.id,
                    listener = index,
                    state = %next.kind(),
                    "state listener panicked"
                );
            }
        }

        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
