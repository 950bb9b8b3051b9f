//! Core types for taskfetch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a download task
///
/// Allocated once per task by [`next_task_id`] and kept for the whole lifetime
/// of the task, including retries.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

static NEXT_TASK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique task id
///
/// Ids are monotonic within the process and never reused. When a provider id
/// is given it becomes the prefix (`http-7`), otherwise `task-7`.
pub fn next_task_id(provider_id: Option<&str>) -> TaskId {
    let seq = NEXT_TASK_SEQ.fetch_add(1, Ordering::Relaxed);
    let prefix = provider_id.filter(|p| !p.is_empty()).unwrap_or("task");
    TaskId(format!("{prefix}-{seq}"))
}

/// Checksum algorithm used for integrity validation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityAlgorithm {
    /// MD5 (legacy mirrors)
    Md5,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl std::fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IntegrityAlgorithm::Md5 => "md5",
            IntegrityAlgorithm::Sha256 => "sha256",
            IntegrityAlgorithm::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for IntegrityAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(IntegrityAlgorithm::Md5),
            "sha256" => Ok(IntegrityAlgorithm::Sha256),
            "sha512" => Ok(IntegrityAlgorithm::Sha512),
            _ => Err(crate::Error::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Expected checksum of a downloaded file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    /// Checksum algorithm
    pub method: IntegrityAlgorithm,
    /// Expected digest, hex encoded
    pub value: String,
}

/// Parameters of a single download task
///
/// Immutable once the task has started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Remote URL
    pub url: String,
    /// File name inside the resolved download directory
    pub file_name: String,
    /// Declared size in bytes (0 = unknown)
    pub total_size: u64,
    /// Optional checksum to validate after the transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,
}

/// Task metadata resolved from configuration when the task starts
///
/// Recorded so that cancel and retry can find the target file without
/// re-reading configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Provider backend id selected at start time
    pub provider_id: String,
    /// Directory the file is written to
    pub resolved_dir: PathBuf,
    /// Task parameters
    pub params: TaskParams,
}

impl TaskMeta {
    /// Full path of the downloaded file
    pub fn target_path(&self) -> PathBuf {
        self.resolved_dir.join(&self.params.file_name)
    }
}

/// Progress notification emitted by providers while transferring
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressNotification {
    /// Bytes written so far
    pub downloaded_bytes: u64,
    /// Total bytes expected (0 = unknown)
    pub total_size: u64,
    /// Current speed in bytes per second
    pub speed_bps: u64,
}

impl ProgressNotification {
    /// Progress percentage (0.0 to 100.0), 0.0 when the size is unknown
    pub fn percent(&self) -> f32 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_size as f64 * 100.0).min(100.0) as f32
    }
}

/// Lifecycle state type, without payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    /// Waiting for an admission slot
    Queuing,
    /// Transfer in progress
    Downloading,
    /// Paused by the user
    Paused,
    /// Checking the downloaded file
    Validating,
    /// Finished successfully
    Completed,
    /// Failed or canceled
    Error,
}

impl StateKind {
    /// Terminal states accept no transition (only a retry restarts the task)
    pub fn is_terminal(self) -> bool {
        matches!(self, StateKind::Completed | StateKind::Error)
    }

    /// Whether the lifecycle allows moving from `from` (None = unstarted) to `to`
    pub fn can_transition(from: Option<StateKind>, to: StateKind) -> bool {
        use StateKind::*;
        match from {
            None => matches!(to, Queuing | Completed | Error),
            Some(Completed) | Some(Error) => false,
            Some(_) if to == Error => true,
            Some(Queuing) => matches!(to, Downloading | Paused),
            Some(Downloading) => matches!(to, Downloading | Validating | Paused),
            Some(Paused) => matches!(to, Queuing | Downloading),
            Some(Validating) => matches!(to, Completed),
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StateKind::Queuing => "queuing",
            StateKind::Downloading => "downloading",
            StateKind::Paused => "paused",
            StateKind::Validating => "validating",
            StateKind::Completed => "completed",
            StateKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Lifecycle state with its transition payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for an admission slot
    Queuing,
    /// Transfer in progress with the latest progress notification
    Downloading(ProgressNotification),
    /// Paused by the user
    Paused,
    /// Checking the downloaded file
    Validating,
    /// Finished successfully
    Completed,
    /// Failed or canceled, with a human-readable message
    Error(String),
}

impl TaskState {
    /// State type without payload
    pub fn kind(&self) -> StateKind {
        match self {
            TaskState::Queuing => StateKind::Queuing,
            TaskState::Downloading(_) => StateKind::Downloading,
            TaskState::Paused => StateKind::Paused,
            TaskState::Validating => StateKind::Validating,
            TaskState::Completed => StateKind::Completed,
            TaskState::Error(_) => StateKind::Error,
        }
    }
}

/// Command accepted by a running task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Pause the transfer (or leave the admission queue)
    Pause,
    /// Continue a paused task
    Continue,
    /// Cancel the task and delete its partial file
    Cancel,
    /// Restart a failed task from scratch
    Retry,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Pause => "pause",
            Command::Continue => "continue",
            Command::Cancel => "cancel",
            Command::Retry => "retry",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Command {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Command::Pause),
            "continue" => Ok(Command::Continue),
            "cancel" => Ok(Command::Cancel),
            "retry" => Ok(Command::Retry),
            other => Err(crate::Error::Other(format!("unknown command: {other}"))),
        }
    }
}

/// Notification delivered to task listeners on every transition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// New state with payload
    pub state: TaskState,
    /// Commands the task accepts in this state
    pub allowed_commands: Vec<Command>,
}

/// Event broadcast by the [`DownloadManager`](crate::DownloadManager)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task that transitioned
    pub id: TaskId,
    /// The transition
    pub update: TaskUpdate,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Admission pool counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Registered tasks
    pub registered: usize,
    /// Admission slots currently held
    pub occupied: usize,
    /// Callers waiting in `queue()`
    pub waiting: usize,
    /// Bound in effect at the last admission decision
    pub max_downloading_tasks: usize,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [StateKind; 6] = [
        StateKind::Queuing,
        StateKind::Downloading,
        StateKind::Paused,
        StateKind::Validating,
        StateKind::Completed,
        StateKind::Error,
    ];

    #[test]
    fn task_ids_are_unique_and_prefixed() {
        let a = next_task_id(Some("http"));
        let b = next_task_id(Some("http"));
        let c = next_task_id(None);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("http-"));
        assert!(c.as_str().starts_with("task-"));
    }

    #[test]
    fn task_id_sequence_is_monotonic() {
        let seq = |id: &TaskId| -> u64 { id.as_str().rsplit('-').next().unwrap().parse().unwrap() };
        let first = next_task_id(None);
        let second = next_task_id(Some(""));
        assert!(seq(&second) > seq(&first));
        assert!(second.as_str().starts_with("task-"), "empty prefix falls back");
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for to in ALL_KINDS {
            assert!(!StateKind::can_transition(Some(StateKind::Completed), to));
            assert!(!StateKind::can_transition(Some(StateKind::Error), to));
        }
    }

    #[test]
    fn error_is_reachable_from_every_live_state() {
        for from in [
            StateKind::Queuing,
            StateKind::Downloading,
            StateKind::Paused,
            StateKind::Validating,
        ] {
            assert!(
                StateKind::can_transition(Some(from), StateKind::Error),
                "{from} -> error must be legal"
            );
        }
    }

    #[test]
    fn lifecycle_edges_match_table() {
        use StateKind::*;
        let legal = [
            (None, Queuing),
            (None, Completed),
            (None, Error),
            (Some(Queuing), Downloading),
            (Some(Queuing), Paused),
            (Some(Downloading), Downloading),
            (Some(Downloading), Validating),
            (Some(Downloading), Paused),
            (Some(Paused), Queuing),
            (Some(Paused), Downloading),
            (Some(Validating), Completed),
        ];
        for (from, to) in legal {
            assert!(StateKind::can_transition(from, to), "{from:?} -> {to}");
        }

        let illegal = [
            (None, Downloading),
            (None, Paused),
            (None, Validating),
            (Some(Queuing), Queuing),
            (Some(Queuing), Validating),
            (Some(Queuing), Completed),
            (Some(Downloading), Queuing),
            (Some(Downloading), Completed),
            (Some(Paused), Paused),
            (Some(Paused), Validating),
            (Some(Validating), Downloading),
            (Some(Validating), Paused),
        ];
        for (from, to) in illegal {
            assert!(!StateKind::can_transition(from, to), "{from:?} -> {to}");
        }
    }

    #[test]
    fn task_state_serializes_as_tagged_value() {
        let state = TaskState::Downloading(ProgressNotification {
            downloaded_bytes: 10,
            total_size: 40,
            speed_bps: 5,
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "downloading");
        assert_eq!(json["payload"]["downloaded_bytes"], 10);

        let err = serde_json::to_value(TaskState::Error("boom".into())).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["payload"], "boom");
    }

    #[test]
    fn percent_handles_unknown_size() {
        let unknown = ProgressNotification {
            downloaded_bytes: 100,
            total_size: 0,
            speed_bps: 0,
        };
        assert_eq!(unknown.percent(), 0.0);

        let half = ProgressNotification {
            downloaded_bytes: 50,
            total_size: 100,
            speed_bps: 0,
        };
        assert!((half.percent() - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn integrity_algorithm_parses_common_spellings() {
        assert_eq!(
            "SHA-256".parse::<IntegrityAlgorithm>().unwrap(),
            IntegrityAlgorithm::Sha256
        );
        assert_eq!(
            "md5".parse::<IntegrityAlgorithm>().unwrap(),
            IntegrityAlgorithm::Md5
        );
        assert!(matches!(
            "crc32".parse::<IntegrityAlgorithm>(),
            Err(crate::Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn command_parses_wire_names() {
        for cmd in [
            Command::Pause,
            Command::Continue,
            Command::Cancel,
            Command::Retry,
        ] {
            assert_eq!(cmd.to_string().parse::<Command>().unwrap(), cmd);
        }
        assert!("stop".parse::<Command>().is_err());
    }

    #[test]
    fn target_path_joins_dir_and_file_name() {
        let meta = TaskMeta {
            provider_id: "http".into(),
            resolved_dir: PathBuf::from("/cache/packages"),
            params: TaskParams {
                url: "https://example.com/a.7z".into(),
                file_name: "a.7z".into(),
                total_size: 1,
                integrity: None,
            },
        };
        assert_eq!(meta.target_path(), PathBuf::from("/cache/packages/a.7z"));
    }
}
