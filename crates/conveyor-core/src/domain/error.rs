//! Error types: infrastructure errors vs. handler failures.
//!
//! Two layers, deliberately kept apart:
//! - `EngineError`: infrastructure and dispatch errors. These propagate to the
//!   immediate caller (producer or worker loop) via `Result`.
//! - `TaskError`: a handler failure captured as data. It is written to the
//!   result store on the `Failed` record and never crashes a worker.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::TaskId;

/// Infrastructure and dispatch errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task `{0}` is already registered")]
    DuplicateTask(String),

    #[error("workflow requires at least one step")]
    EmptyWorkflow,

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("result store unavailable: {0}")]
    ResultStoreUnavailable(String),

    #[error("timed out waiting for task {0}")]
    WaitTimeout(TaskId),
}

/// Classification of a handler failure.
///
/// Whether a failure is worth retrying is decided by the task definition's
/// retry policy, but the handler supplies the raw classification:
/// - `Transient`: a dependency hiccup; retrying may succeed.
/// - `Permanent`: malformed input or a logic error; retrying is pointless.
/// - `TimeLimit`: the attempt exceeded its wall-clock limit (treated as
///   transient by the `TransientOnly` policy).
/// - `UnknownTask`: registry miss in the consuming process; never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    TimeLimit,
    UnknownTask,
}

/// A handler failure, captured as data.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn time_limit(limit: Duration) -> Self {
        Self {
            kind: FailureKind::TimeLimit,
            message: format!("time limit of {limit:?} exceeded"),
        }
    }

    pub fn unknown_task(name: &str) -> Self {
        Self {
            kind: FailureKind::UnknownTask,
            message: format!("no task registered under name `{name}`"),
        }
    }
}
