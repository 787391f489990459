//! Task results: status lifecycle and the record stored per submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{TaskError, TaskId};

/// Status of one task submission.
///
/// Transitions: `Pending -> Started -> {Completed | Failed | Retrying}`,
/// with `Retrying -> Pending` on re-enqueue. `Completed` and `Failed` are
/// terminal; no further transitions occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Started,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Started => "Started",
            TaskStatus::Retrying => "Retrying",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One status transition, applied by the dispatcher that owns the submission.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Started,
    Retrying,
    Completed(Value),
    Failed(TaskError),
}

/// The durable record a caller polls by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub updated_at: DateTime<Utc>,
}

impl TaskResult {
    /// Fresh `Pending` record, created atomically with the submission.
    pub fn pending(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply a transition. Terminal records are immutable: updates against a
    /// `Completed` or `Failed` record are ignored, which keeps redelivered
    /// submissions harmless.
    pub fn apply(&mut self, update: StatusUpdate) {
        if self.status.is_terminal() {
            return;
        }
        match update {
            StatusUpdate::Started => self.status = TaskStatus::Started,
            StatusUpdate::Retrying => self.status = TaskStatus::Retrying,
            StatusUpdate::Completed(value) => {
                self.status = TaskStatus::Completed;
                self.result = Some(value);
            }
            StatusUpdate::Failed(error) => {
                self.status = TaskStatus::Failed;
                self.error = Some(error);
            }
        }
        self.updated_at = Utc::now();
    }
}

/// Terminal outcome of a chord header member: the handler's value, or the
/// captured error in its place. A failed member does not abort the chord.
pub type MemberOutcome = Result<Value, TaskError>;
