//! Workflow composition: chains, groups, and chords.
//!
//! A workflow is planned entirely at composition time: every step gets its id
//! and a `Pending` result up front, and the execution graph travels with the
//! submissions themselves (chain continuations, chord memberships). Producers
//! and workers therefore coordinate only through the broker and the result
//! store, never through shared memory.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::domain::{
    ChordMembership, EngineError, MemberOutcome, PlannedStep, StatusUpdate, TaskError, TaskId,
    TaskSubmission,
};
use crate::results::ResultStore;
use crate::router::QueueRouter;

/// Caller-facing description of one step: what to run, with which arguments,
/// on which queue.
///
/// `carry_slot` is the explicit carry contract for composition: when a chain
/// step (or chord callback) receives an upstream value, it is spliced into the
/// positional arguments at this index. Defaults to 0 (prepend).
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: Option<String>,
    pub carry_slot: usize,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            queue: None,
            carry_slot: 0,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Override the route-table queue for this step.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn carry_slot(mut self, slot: usize) -> Self {
        self.carry_slot = slot;
        self
    }

    /// Allocate an id and resolve the destination queue.
    pub(crate) fn plan(self, router: &QueueRouter) -> PlannedStep {
        let queue = match self.queue {
            Some(queue) => queue,
            None => router.route_for(&self.name).to_string(),
        };
        PlannedStep {
            task_id: TaskId::generate(),
            task_name: self.name,
            args: self.args,
            kwargs: self.kwargs,
            queue,
            carry_slot: self.carry_slot,
        }
    }
}

/// Advance workflow state after a submission reached `Completed`.
///
/// Chain: splice the result into the next planned step and enqueue it.
/// Chord member: record the outcome against the barrier; the last member to
/// settle enqueues the callback with the gathered results.
pub(crate) async fn advance_on_success(
    broker: &Arc<dyn Broker>,
    results: &Arc<dyn ResultStore>,
    submission: &TaskSubmission,
    value: &Value,
) -> Result<(), EngineError> {
    if let Some((next, rest)) = submission.continuation.split_first() {
        let mut next = next.clone().into_submission(Some(value.clone()));
        next.continuation = rest.to_vec();
        debug!(task_id = %next.task_id, task = %next.task_name, "chain advancing");
        broker.enqueue(next, std::time::Duration::ZERO).await?;
        return Ok(());
    }
    if let Some(membership) = &submission.chord {
        settle_chord_member(broker, results, membership, Ok(value.clone())).await?;
    }
    Ok(())
}

/// Settle workflow state after a submission reached terminal `Failed`.
///
/// Chain: short-circuit; the remaining steps are never enqueued and their
/// (already created) results are marked `Failed` with this step's error, so a
/// caller polling the chain's visible id observes the failure.
/// Chord member: the error takes the member's slot; the chord itself is not
/// aborted.
pub(crate) async fn advance_on_failure(
    broker: &Arc<dyn Broker>,
    results: &Arc<dyn ResultStore>,
    submission: &TaskSubmission,
    error: &TaskError,
) -> Result<(), EngineError> {
    for step in &submission.continuation {
        debug!(task_id = %step.task_id, "chain short-circuited");
        results
            .set_status(step.task_id, StatusUpdate::Failed(error.clone()))
            .await?;
    }
    if let Some(membership) = &submission.chord {
        settle_chord_member(broker, results, membership, Err(error.clone())).await?;
    }
    Ok(())
}

async fn settle_chord_member(
    broker: &Arc<dyn Broker>,
    results: &Arc<dyn ResultStore>,
    membership: &ChordMembership,
    outcome: MemberOutcome,
) -> Result<(), EngineError> {
    let gathered = results
        .complete_chord_member(membership.chord_id, membership.position, outcome)
        .await?;
    let Some(outcomes) = gathered else {
        return Ok(());
    };
    info!(
        chord_id = %membership.chord_id,
        callback = %membership.callback.task_name,
        "chord header complete, dispatching callback"
    );
    let callback = membership
        .callback
        .clone()
        .into_submission(Some(gather_value(outcomes)));
    broker.enqueue(callback, std::time::Duration::ZERO).await
}

/// Collapse member outcomes into the callback's carried argument: results in
/// header-declaration order, a failed member's error descriptor in place of
/// its result.
fn gather_value(outcomes: Vec<MemberOutcome>) -> Value {
    let items = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Ok(value) => value,
            Err(error) => serde_json::json!({ "error": error }),
        })
        .collect();
    Value::Array(items)
}
