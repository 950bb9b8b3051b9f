//! Error types for taskfetch
//!
//! This module provides the single error type used across the crate:
//! - Configuration and provider resolution failures
//! - Transfer failures reported by providers
//! - Integrity validation failures
//! - Protocol errors (illegal commands or state transitions)
//!
//! [`ErrorCategory`] groups the variants by how a caller is expected to react.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Command, StateKind};

/// Result type alias for taskfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for taskfetch
///
/// The `Display` form of an error is what a task stores as the payload of its
/// `error` state, so messages are written to be shown to a user.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_downloading_tasks")
        key: Option<String>,
    },

    /// No provider backend is registered under the requested id
    #[error("can't find download provider with id {0}")]
    ProviderNotFound(String),

    /// A provider's transfer failed (remote error, truncated stream, ...)
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Downloaded file does not match the declared checksum
    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// File that was validated
        path: PathBuf,
        /// Expected hex digest
        expected: String,
        /// Computed hex digest
        actual: String,
    },

    /// Checksum algorithm name is not recognised
    #[error("unsupported integrity algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Command is not legal for the task's current state or provider capabilities
    #[error("illegal command received: {command} in state {state}{}", payload_suffix(.payload))]
    IllegalCommand {
        /// The rejected command
        command: Command,
        /// State the task was in (`unstarted` before the first transition)
        state: String,
        /// Payload passed with the command, if any
        payload: Option<String>,
    },

    /// Attempted state machine edge that the lifecycle does not allow
    #[error("illegal state transition from {} to {to}", from_label(.from))]
    IllegalTransition {
        /// Current state (`None` when unstarted)
        from: Option<StateKind>,
        /// Requested state
        to: StateKind,
    },

    /// Operation not supported by the provider (e.g. pause on a single-stream backend)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Task was canceled by the user while the operation ran
    #[error("Task canceled by user")]
    Canceled,

    /// Task not known to the manager
    #[error("task not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn payload_suffix(payload: &Option<String>) -> String {
    match payload {
        Some(p) => format!(", payload: {p}"),
        None => String::new(),
    }
}

fn from_label(from: &Option<StateKind>) -> String {
    match from {
        Some(kind) => kind.to_string(),
        None => "unstarted".to_string(),
    }
}

/// Coarse classification of errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown provider id, bad or missing configuration
    Configuration,
    /// Network or disk failure during the transfer
    Transfer,
    /// Checksum mismatch or unusable checksum metadata
    Validation,
    /// Caller sent a command the task cannot accept right now
    Protocol,
    /// Task was canceled
    Canceled,
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config { .. } | Error::ProviderNotFound(_) | Error::NotFound(_) => {
                ErrorCategory::Configuration
            }
            Error::IntegrityMismatch { .. } | Error::UnsupportedAlgorithm(_) => {
                ErrorCategory::Validation
            }
            Error::IllegalCommand { .. }
            | Error::IllegalTransition { .. }
            | Error::NotSupported(_) => ErrorCategory::Protocol,
            Error::Canceled => ErrorCategory::Canceled,
            Error::Transfer(_)
            | Error::Io(_)
            | Error::Network(_)
            | Error::Serialization(_)
            | Error::Other(_) => ErrorCategory::Transfer,
        }
    }

    /// Whether an explicit `retry` command can reasonably succeed
    ///
    /// Protocol errors never reach the `error` state, so they are not retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Protocol)
    }

    /// Shorthand for a configuration error bound to a config key
    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
