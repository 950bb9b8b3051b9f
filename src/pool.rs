//! Admission pool: task directory plus the shared concurrency gate.
//!
//! Every task registers an entry here when it starts and keeps its state
//! snapshot current on each transition. Before a transfer begins the task
//! calls [`AdmissionPool::queue`], which resolves in FIFO order once fewer than
//! `max_downloading_tasks` slots are held. The returned [`AdmissionPermit`]
//! holds the slot until it is dropped.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::config::ConfigHandle;
use crate::types::{PoolStats, TaskId, TaskMeta, TaskState};

/// Snapshot of a registered task
#[derive(Clone, Debug)]
pub struct PoolEntry {
    /// Task id
    pub id: TaskId,
    /// Last known state (None = unstarted)
    pub state: Option<TaskState>,
    /// Metadata resolved when the task started
    pub meta: TaskMeta,
    /// When the entry was registered
    pub registered_at: DateTime<Utc>,
    /// When the state snapshot last changed
    pub updated_at: DateTime<Utc>,
}

struct Admission {
    occupied: usize,
    waiters: VecDeque<oneshot::Sender<AdmissionPermit>>,
    last_bound: usize,
}

struct PoolShared {
    config: ConfigHandle,
    entries: Mutex<HashMap<TaskId, PoolEntry>>,
    admission: Mutex<Admission>,
}

impl PoolShared {
    fn admission(&self) -> MutexGuard<'_, Admission> {
        self.admission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TaskId, PoolEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hand out free slots to waiters, oldest first.
///
/// The bound is re-read from configuration on every call.
fn admit_waiting(shared: &Arc<PoolShared>, admission: &mut Admission) {
    let bound = shared.config.max_downloading_tasks();
    admission.last_bound = bound;

    while admission.occupied < bound {
        let Some(waiter) = admission.waiters.pop_front() else {
            break;
        };
        admission.occupied += 1;
        if let Err(mut permit) = waiter.send(AdmissionPermit::new(Arc::clone(shared))) {
            // Waiter went away before being admitted; its slot was never used.
            permit.disarm();
            admission.occupied -= 1;
        }
    }
}

/// Slot in the admission pool, released on drop
#[must_use = "dropping the permit releases the admission slot immediately"]
pub struct AdmissionPermit {
    pool: Option<Arc<PoolShared>>,
}

impl AdmissionPermit {
    fn new(pool: Arc<PoolShared>) -> Self {
        Self { pool: Some(pool) }
    }

    fn disarm(&mut self) {
        self.pool = None;
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(shared) = self.pool.take() {
            let mut admission = shared.admission();
            admission.occupied = admission.occupied.saturating_sub(1);
            admit_waiting(&shared, &mut admission);
        }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("armed", &self.pool.is_some())
            .finish()
    }
}

/// Process-wide task directory and admission gate (cloneable handle)
#[derive(Clone)]
pub struct AdmissionPool {
    shared: Arc<PoolShared>,
}

impl AdmissionPool {
    /// Create a pool whose bound follows `config`
    pub fn new(config: ConfigHandle) -> Self {
        let last_bound = config.max_downloading_tasks();
        Self {
            shared: Arc::new(PoolShared {
                config,
                entries: Mutex::new(HashMap::new()),
                admission: Mutex::new(Admission {
                    occupied: 0,
                    waiters: VecDeque::new(),
                    last_bound,
                }),
            }),
        }
    }

    /// Register a task; an existing entry with the same id is overwritten
    pub fn add(&self, id: TaskId, state: Option<TaskState>, meta: TaskMeta) {
        let now = Utc::now();
        let entry = PoolEntry {
            id: id.clone(),
            state,
            meta,
            registered_at: now,
            updated_at: now,
        };
        if self.shared.entries().insert(id.clone(), entry).is_some() {
            tracing::debug!(task_id = %id, "pool entry overwritten");
        }
    }

    /// Overwrite a task's state snapshot; no-op if the task was removed
    pub fn update(&self, id: &TaskId, state: &TaskState) {
        if let Some(entry) = self.shared.entries().get_mut(id) {
            entry.state = Some(state.clone());
            entry.updated_at = Utc::now();
        }
    }

    /// Remove a task; returns whether an entry existed
    pub fn remove(&self, id: &TaskId) -> bool {
        self.shared.entries().remove(id).is_some()
    }

    /// Look up one entry
    pub fn get(&self, id: &TaskId) -> Option<PoolEntry> {
        self.shared.entries().get(id).cloned()
    }

    /// Whether the task is registered
    pub fn contains(&self, id: &TaskId) -> bool {
        self.shared.entries().contains_key(id)
    }

    /// All entries, oldest registration first
    pub fn entries(&self) -> Vec<PoolEntry> {
        let mut entries: Vec<_> = self.shared.entries().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries
    }

    /// Wait for an admission slot
    ///
    /// Callers are admitted in arrival order. The slot is held until the
    /// returned permit is dropped.
    pub async fn queue(&self) -> AdmissionPermit {
        loop {
            let receiver = {
                let mut admission = self.shared.admission();
                let bound = self.shared.config.max_downloading_tasks();
                admission.last_bound = bound;
                admission.waiters.retain(|waiter| !waiter.is_closed());

                if admission.waiters.is_empty() && admission.occupied < bound {
                    admission.occupied += 1;
                    return AdmissionPermit::new(Arc::clone(&self.shared));
                }

                let (tx, rx) = oneshot::channel();
                admission.waiters.push_back(tx);
                rx
            };

            if let Ok(permit) = receiver.await {
                return permit;
            }
        }
    }

    /// Re-evaluate the bound and admit waiters if slots opened up
    ///
    /// Called after configuration changes; lowering the bound never evicts
    /// tasks that already hold a slot.
    pub fn rebalance(&self) {
        let mut admission = self.shared.admission();
        admit_waiting(&self.shared, &mut admission);
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let registered = self.shared.entries().len();
        let admission = self.shared.admission();
        PoolStats {
            registered,
            occupied: admission.occupied,
            waiting: admission
                .waiters
                .iter()
                .filter(|waiter| !waiter.is_closed())
                .count(),
            max_downloading_tasks: admission.last_bound,
        }
    }
}

impl std::fmt::Debug for AdmissionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPool")
            .field("stats", &self.stats())
            .finish()
    }
}
