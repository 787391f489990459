//! Domain model: identifiers, submissions, results, errors.

mod error;
mod ids;
mod result;
mod submission;

pub use error::{EngineError, FailureKind, TaskError};
pub use ids::{ChordId, TaskId};
pub use result::{MemberOutcome, StatusUpdate, TaskResult, TaskStatus};
pub use submission::{ChordMembership, PlannedStep, TaskSubmission};
