//! Task status events delivered over the push channel.
//!
//! The backend publishes one JSON message per status change to
//! `/topic/tasks/{taskId}/status`. Status values on the wire are exactly
//! `RUNNING`, `COMPLETED` and `ERROR`.

use serde::{Deserialize, Serialize};

use crate::types::{TaskId, Timestamp};

/// Default STOMP destination prefix for broker topics.
pub const DEFAULT_TOPIC_PREFIX: &str = "/topic";

/// Lifecycle status of a backend grouping task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "ERROR")]
    Errored,
}

impl TaskStatus {
    /// `Completed` and `Errored` are terminal: no further events follow.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Errored => "ERROR",
        }
    }
}

/// One status update for one task, as published by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Completion percentage, when the backend reports it.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    /// ISO-8601 instant as sent by the backend; kept verbatim.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl StatusEvent {
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            progress: None,
            message: None,
            timestamp: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The backend's timestamp, if present and RFC 3339.
    pub fn occurred_at(&self) -> Option<Timestamp> {
        let raw = self.timestamp.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&chrono::Utc))
    }
}

/// Parse a push-channel message body into a [`StatusEvent`].
///
/// Returns `Err` for malformed JSON, missing fields, or unknown status
/// strings. Callers log and drop such payloads.
pub fn parse_status_event(body: &str) -> Result<StatusEvent, serde_json::Error> {
    serde_json::from_str(body)
}

/// Topic a client subscribes to for status updates of `task_id`.
pub fn status_topic(prefix: &str, task_id: &TaskId) -> String {
    format!("{}/tasks/{}/status", prefix.trim_end_matches('/'), task_id)
}
