//! Task submissions: the unit of work that crosses the broker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ChordId, TaskId};

/// One instance of work, owned by the broker until a dispatcher claims it.
///
/// Immutable except for `retries_so_far`, which is incremented only when the
/// retry policy re-enqueues a failed attempt.
///
/// Workflow metadata rides along with the submission so that producers and
/// workers coordinate only through the broker and the result store:
/// - `continuation` holds the remaining chain steps, nearest first.
/// - `chord` marks this submission as one member of a chord header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub task_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: String,
    pub retries_so_far: u32,
    #[serde(default)]
    pub continuation: Vec<PlannedStep>,
    #[serde(default)]
    pub chord: Option<ChordMembership>,
}

/// A step planned at composition time but not yet enqueued.
///
/// Ids are allocated (and `Pending` results created) for every planned step
/// when the workflow is composed, so callers can poll any step's id before it
/// has been submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub task_id: TaskId,
    pub task_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: String,
    /// Index at which a carried value (the previous step's result, or a
    /// chord's gathered results) is spliced into `args`.
    pub carry_slot: usize,
}

impl PlannedStep {
    /// Turn the planned step into a concrete submission, splicing `carried`
    /// into the args at the carry slot. The slot is clamped to the current
    /// argument count, so a slot past the end appends.
    pub fn into_submission(self, carried: Option<Value>) -> TaskSubmission {
        let mut args = self.args;
        if let Some(value) = carried {
            let slot = self.carry_slot.min(args.len());
            args.insert(slot, value);
        }
        TaskSubmission {
            task_id: self.task_id,
            task_name: self.task_name,
            args,
            kwargs: self.kwargs,
            queue: self.queue,
            retries_so_far: 0,
            continuation: Vec::new(),
            chord: None,
        }
    }
}

/// Membership of one submission in a chord header.
///
/// Every member carries the callback step; only the member that settles last
/// (detected by the barrier decrement in the result store) enqueues it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChordMembership {
    pub chord_id: ChordId,
    /// Position in header-declaration order. Gathered results follow this
    /// order, not completion order.
    pub position: usize,
    pub callback: PlannedStep,
}
