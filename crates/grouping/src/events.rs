//! Events emitted by the orchestrator.
//!
//! UI layers subscribe to these instead of polling orchestrator state.

use cte_core::status::StatusEvent;
use cte_core::types::TaskId;
use serde::Serialize;

/// Orchestration state for the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunState {
    #[default]
    Idle,
    Submitting,
    /// Waiting for the push channel or the fallback timer.
    Awaiting,
    Fetching,
    Done,
    Failed,
}

/// What completed the `Awaiting` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionSource {
    /// A terminal status event arrived on the push channel.
    Push,
    /// The fallback timer elapsed first.
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub enum OrchestratorEvent {
    /// The run moved to a new state. `task_id` is `None` before a task
    /// has been assigned.
    StateChanged {
        task_id: Option<TaskId>,
        state: RunState,
    },

    /// A push-channel status update for the active run.
    Status(StatusEvent),

    /// The task finished and its bundle is ready; callers may proceed.
    Finished {
        task_id: TaskId,
        source: CompletionSource,
    },

    /// The run failed. `message` is the single human-readable error.
    Failed {
        task_id: Option<TaskId>,
        message: String,
    },
}
