//! Broker: durable enqueue/dequeue transport between producers and workers.

mod memory;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{EngineError, TaskSubmission};

/// A claimed submission. The worker owns this delivery and must `ack` it
/// after recording the outcome; a delivery dropped without an ack (worker
/// crash) is redelivered once its visibility timeout lapses.
#[async_trait]
pub trait Delivery: Send {
    fn submission(&self) -> &TaskSubmission;

    /// Acknowledge: the outcome has been recorded, the broker may forget the
    /// submission.
    async fn ack(self: Box<Self>) -> Result<(), EngineError>;
}

/// Broker port. At-least-once delivery; enqueue is fire-and-forget from the
/// caller's perspective and never waits for execution.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a submission on its queue. `delay` is a minimum delay before
    /// the submission becomes visible to dispatchers (used for retry
    /// backoff); `Duration::ZERO` means immediately visible.
    async fn enqueue(&self, submission: TaskSubmission, delay: Duration)
        -> Result<(), EngineError>;

    /// Claim one visible submission from any of `queues`, blocking up to
    /// `timeout`. `Ok(None)` means no work arrived in time.
    async fn dequeue(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, EngineError>;
}
