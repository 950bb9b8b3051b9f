//! # taskfetch
//!
//! Resumable download tasks behind a bounded admission pool.
//!
//! ## Design Philosophy
//!
//! taskfetch is designed to be:
//! - **Pluggable** - transfers are performed by provider backends picked by id
//! - **Bounded** - at most `max_downloading_tasks` transfers run at once, the rest wait FIFO
//! - **Interruptible** - pause, continue, cancel and retry act at well-defined checkpoints
//! - **Event-driven** - every state transition is broadcast to subscribers
//!
//! ## Quick Start
//!
//! ```no_run
//! use taskfetch::{Config, DownloadManager, TaskParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = DownloadManager::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}: {:?}", event.id, event.update.state);
//!         }
//!     });
//!
//!     let task = manager.create_task(TaskParams {
//!         url: "https://example.com/releases/tool.7z".to_string(),
//!         file_name: String::new(),
//!         total_size: 0,
//!         integrity: None,
//!     });
//!     task.start().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Cache-hit detection
pub mod cache;
/// Command legality table
pub mod commands;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Checksum validation
pub mod integrity;
/// Application-facing manager (decomposed into focused submodules)
pub mod manager;
/// Admission control and task directory
pub mod pool;
/// Transfer backends
pub mod provider;
/// Per-task lifecycle state machine
pub mod state_machine;
/// Task orchestration (decomposed into focused submodules)
pub mod task;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheProbe, FsCacheProbe};
pub use commands::{allowed_commands, is_allowed};
pub use config::{Config, ConfigHandle, ConfigUpdate, DownloadConfig};
pub use error::{Error, ErrorCategory, Result};
pub use integrity::{ChecksumValidator, IntegrityValidator};
pub use manager::DownloadManager;
pub use pool::{AdmissionPermit, AdmissionPool, PoolEntry};
pub use provider::{
    HttpBackend, HttpProvider, ProgressCallback, Provider, ProviderBackend, ProviderInfo,
    ProviderRegistry, RangedHttpBackend, RangedHttpProvider, TransferParams,
};
pub use state_machine::{StateListener, StateMachine};
pub use task::{DownloadTask, TaskContext, TaskListener};
pub use types::{
    Command, Integrity, IntegrityAlgorithm, PoolStats, ProgressNotification, StateKind, TaskEvent,
    TaskId, TaskMeta, TaskParams, TaskState, TaskUpdate, next_task_id,
};
