//! Task lifecycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a scheduled task.
pub type TaskId = Uuid;

/// Lifecycle state of a task.
///
/// `Scheduled` and `Running` are live states; the other three are
/// terminal and never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Finished,
    Cancelled,
    Errored,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Cancelled | TaskStatus::Errored
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Errored => "ERRORED",
        };
        write!(f, "{s}")
    }
}

/// Persisted record of a task from scheduling through completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    /// Completion fraction in `[0, 1]`, reported by the task itself.
    pub progress: f32,
    /// Parameters the task was scheduled with.
    pub params: serde_json::Value,
    /// Result value, set only when the task finishes successfully.
    pub result: Option<serde_json::Value>,
    /// Error description, set only when the task errors out.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// A freshly scheduled record.
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: TaskStatus::Scheduled,
            progress: 0.0,
            params,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
