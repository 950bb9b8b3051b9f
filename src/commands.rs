//! Command legality table
//!
//! Decides which [`Command`]s a task accepts given its current state type and
//! whether its provider can pause mid-transfer. The orchestrator consults this
//! before dispatching and listeners receive the result with every transition.

use crate::types::{Command, StateKind};

/// Commands accepted in `state` (None = unstarted)
///
/// - `pause`: while queuing (never touches the provider) or while downloading
///   with a pausable provider
/// - `continue`: while paused
/// - `cancel`: from any non-terminal state
/// - `retry`: only from `error`
pub fn allowed_commands(state: Option<StateKind>, allow_pause: bool) -> Vec<Command> {
    let Some(state) = state else {
        return Vec::new();
    };

    match state {
        StateKind::Queuing => vec![Command::Pause, Command::Cancel],
        StateKind::Downloading if allow_pause => vec![Command::Pause, Command::Cancel],
        StateKind::Downloading => vec![Command::Cancel],
        StateKind::Paused => vec![Command::Continue, Command::Cancel],
        StateKind::Validating => vec![Command::Cancel],
        StateKind::Completed => Vec::new(),
        StateKind::Error => vec![Command::Retry],
    }
}

/// Whether `command` is accepted in `state`
pub fn is_allowed(state: Option<StateKind>, allow_pause: bool, command: Command) -> bool {
    allowed_commands(state, allow_pause).contains(&command)
}
