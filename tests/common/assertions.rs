//! Waiting helpers built on the event channel

use std::time::Duration;
use tokio::sync::broadcast;
use taskfetch::{StateKind, TaskEvent, TaskId};

/// Default upper bound for any wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Result of waiting for a task to reach a state
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The state was observed
    Reached,
    /// Timeout waiting for the state
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait until `id` transitions into `kind`
pub async fn wait_for_state(
    events: &mut broadcast::Receiver<TaskEvent>,
    id: &TaskId,
    kind: StateKind,
) -> WaitResult {
    let result = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if &event.id == id && event.update.state.kind() == kind => {
                    return WaitResult::Reached;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// State types seen for `id` so far, consecutive duplicates collapsed
pub fn drain_kinds(events: &mut broadcast::Receiver<TaskEvent>, id: &TaskId) -> Vec<StateKind> {
    let mut kinds: Vec<StateKind> = Vec::new();
    while let Ok(event) = events.try_recv() {
        if &event.id != id {
            continue;
        }
        let kind = event.update.state.kind();
        if kinds.last() != Some(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

/// Poll `condition` until it holds, panicking after [`WAIT`]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
