//! In-memory broker.
//!
//! Process-local stand-in for a durable queue transport, with the same
//! observable semantics: per-queue FIFO for fresh submissions, delayed
//! visibility for retries, and redelivery of claimed-but-unacknowledged
//! submissions after a visibility timeout.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{Broker, Delivery};
use crate::domain::{EngineError, TaskId, TaskSubmission};

/// Upper bound on one wait slice in `dequeue`. A capped sleep keeps the loop
/// live even if a notify permit is consumed by a worker on another queue.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

/// A submission waiting for its visibility time.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first); `seq`
/// breaks ties to keep enqueue order stable.
struct DelayedEntry {
    visible_at: Instant,
    seq: u64,
    submission: TaskSubmission,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.visible_at == other.visible_at && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.visible_at, other.seq).cmp(&(self.visible_at, self.seq))
    }
}

struct InFlightEntry {
    submission: TaskSubmission,
    deadline: Instant,
}

struct BrokerState {
    /// Visible submissions, per queue, FIFO.
    ready: HashMap<String, VecDeque<TaskSubmission>>,

    /// Submissions waiting out an enqueue/backoff delay.
    delayed: BinaryHeap<DelayedEntry>,

    /// Claimed, not yet acknowledged. Redelivered past their deadline.
    in_flight: HashMap<TaskId, InFlightEntry>,

    seq: u64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            ready: HashMap::new(),
            delayed: BinaryHeap::new(),
            in_flight: HashMap::new(),
            seq: 0,
        }
    }

    fn push_ready(&mut self, submission: TaskSubmission) {
        self.ready
            .entry(submission.queue.clone())
            .or_default()
            .push_back(submission);
    }

    /// Move delayed submissions whose time has come into their ready queues.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if entry.visible_at > now {
                break; // heap is sorted, nothing further is due
            }
            let entry = self.delayed.pop().expect("peeked entry exists");
            self.push_ready(entry.submission);
        }
    }

    /// Redeliver claimed submissions whose visibility deadline has lapsed.
    fn redeliver_expired(&mut self, now: Instant) {
        let expired: Vec<TaskId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for task_id in expired {
            let entry = self.in_flight.remove(&task_id).expect("id collected above");
            debug!(%task_id, "visibility timeout lapsed, redelivering");
            self.push_ready(entry.submission);
        }
    }

    /// Earliest future event that could make work visible.
    fn next_event(&self) -> Option<Instant> {
        let delayed = self.delayed.peek().map(|e| e.visible_at);
        let in_flight = self.in_flight.values().map(|e| e.deadline).min();
        match (delayed, in_flight) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemoryBroker {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(
        &self,
        submission: TaskSubmission,
        delay: Duration,
    ) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().await;
            if delay.is_zero() {
                state.push_ready(submission);
            } else {
                let seq = state.seq;
                state.seq += 1;
                state.delayed.push(DelayedEntry {
                    visible_at: Instant::now() + delay,
                    seq,
                    submission,
                });
            }
        }
        // Notify outside the lock.
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let next_event = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.promote_due(now);
                state.redeliver_expired(now);

                let claimed = queues.iter().find_map(|queue| {
                    state.ready.get_mut(queue).and_then(VecDeque::pop_front)
                });
                if let Some(submission) = claimed {
                    let task_id = submission.task_id;
                    state.in_flight.insert(
                        task_id,
                        InFlightEntry {
                            submission: submission.clone(),
                            deadline: now + self.visibility_timeout,
                        },
                    );
                    return Ok(Some(Box::new(InMemoryDelivery {
                        task_id,
                        submission,
                        state: Arc::clone(&self.state),
                    })));
                }
                state.next_event()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let mut wake = deadline.min(now + MAX_WAIT_SLICE);
            if let Some(event) = next_event {
                wake = wake.min(event.max(now));
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake.into()) => {}
            }
        }
    }
}

struct InMemoryDelivery {
    task_id: TaskId,
    submission: TaskSubmission,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn submission(&self) -> &TaskSubmission {
        &self.submission
    }

    async fn ack(self: Box<Self>) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&self.task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn submission(queue: &str) -> TaskSubmission {
        TaskSubmission {
            task_id: TaskId::generate(),
            task_name: "tasks.process_data".to_string(),
            args: vec![],
            kwargs: Map::new(),
            queue: queue.to_string(),
            retries_so_far: 0,
            continuation: vec![],
            chord: None,
        }
    }

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let broker = InMemoryBroker::new(Duration::from_secs(30));
        let sub = submission("default");
        let id = sub.task_id;
        broker.enqueue(sub, Duration::ZERO).await.unwrap();

        let delivery = broker
            .dequeue(&queues(&["default"]), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.submission().task_id, id);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let broker = InMemoryBroker::new(Duration::from_secs(30));
        let claimed = broker
            .dequeue(&queues(&["default"]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let broker = InMemoryBroker::new(Duration::from_secs(30));
        broker
            .enqueue(submission("calculations"), Duration::ZERO)
            .await
            .unwrap();

        let claimed = broker
            .dequeue(&queues(&["documents"]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn fresh_submissions_are_fifo_per_queue() {
        let broker = InMemoryBroker::new(Duration::from_secs(30));
        let first = submission("default");
        let second = submission("default");
        let (a, b) = (first.task_id, second.task_id);
        broker.enqueue(first, Duration::ZERO).await.unwrap();
        broker.enqueue(second, Duration::ZERO).await.unwrap();

        let q = queues(&["default"]);
        let d1 = broker
            .dequeue(&q, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let d2 = broker
            .dequeue(&q, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d1.submission().task_id, a);
        assert_eq!(d2.submission().task_id, b);
    }

    #[tokio::test]
    async fn delayed_submission_stays_invisible_until_due() {
        let broker = InMemoryBroker::new(Duration::from_secs(30));
        broker
            .enqueue(submission("default"), Duration::from_millis(80))
            .await
            .unwrap();

        let q = queues(&["default"]);
        let early = broker
            .dequeue(&q, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(early.is_none());

        let later = broker
            .dequeue(&q, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(later.is_some());
    }

    #[tokio::test]
    async fn unacked_delivery_is_redelivered_after_visibility_timeout() {
        let broker = InMemoryBroker::new(Duration::from_millis(50));
        let sub = submission("default");
        let id = sub.task_id;
        broker.enqueue(sub, Duration::ZERO).await.unwrap();

        let q = queues(&["default"]);
        let delivery = broker
            .dequeue(&q, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        // Simulate a worker crash: drop the delivery without acking.
        drop(delivery);

        let redelivered = broker
            .dequeue(&q, Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.submission().task_id, id);
        redelivered.ack().await.unwrap();
    }

    #[tokio::test]
    async fn acked_delivery_is_never_redelivered() {
        let broker = InMemoryBroker::new(Duration::from_millis(30));
        broker
            .enqueue(submission("default"), Duration::ZERO)
            .await
            .unwrap();

        let q = queues(&["default"]);
        let delivery = broker
            .dequeue(&q, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        delivery.ack().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let again = broker
            .dequeue(&q, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(again.is_none());
    }
}
