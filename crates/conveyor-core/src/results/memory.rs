//! In-memory result store.
//!
//! Process-local stand-in for a shared backing store. One mutex guards all
//! state, which makes every create/update linearizable, including the chord
//! barrier's decrement-and-gather.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::ResultStore;
use crate::domain::{
    ChordId, EngineError, MemberOutcome, StatusUpdate, TaskId, TaskResult,
};

/// Barrier state for one chord instance.
struct ChordBarrier {
    remaining: usize,
    /// Outcome slots in header-declaration order.
    slots: Vec<Option<MemberOutcome>>,
}

struct StoreState {
    results: HashMap<TaskId, TaskResult>,
    chords: HashMap<ChordId, ChordBarrier>,
}

pub struct InMemoryResultStore {
    state: Mutex<StoreState>,
    expiry: Duration,
}

impl InMemoryResultStore {
    pub fn new(expiry: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState {
                results: HashMap::new(),
                chords: HashMap::new(),
            }),
            expiry,
        }
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn create(&self, task_id: TaskId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state
            .results
            .entry(task_id)
            .or_insert_with(|| TaskResult::pending(task_id));
        Ok(())
    }

    async fn set_status(&self, task_id: TaskId, update: StatusUpdate) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state
            .results
            .entry(task_id)
            .or_insert_with(|| TaskResult::pending(task_id))
            .apply(update);
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskResult>, EngineError> {
        let mut state = self.state.lock().await;
        let expired = match state.results.get(&task_id) {
            Some(record) if record.status.is_terminal() => {
                let age = Utc::now().signed_duration_since(record.updated_at);
                age.to_std().map(|age| age >= self.expiry).unwrap_or(false)
            }
            _ => false,
        };
        if expired {
            state.results.remove(&task_id);
            return Ok(None);
        }
        Ok(state.results.get(&task_id).cloned())
    }

    async fn init_chord(&self, chord_id: ChordId, size: usize) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.chords.entry(chord_id).or_insert_with(|| ChordBarrier {
            remaining: size,
            slots: vec![None; size],
        });
        Ok(())
    }

    async fn complete_chord_member(
        &self,
        chord_id: ChordId,
        position: usize,
        outcome: MemberOutcome,
    ) -> Result<Option<Vec<MemberOutcome>>, EngineError> {
        let mut state = self.state.lock().await;
        let Some(barrier) = state.chords.get_mut(&chord_id) else {
            // Barrier already fired and was dropped, or was never initialized.
            return Ok(None);
        };
        if position >= barrier.slots.len() || barrier.slots[position].is_some() {
            return Ok(None);
        }
        barrier.slots[position] = Some(outcome);
        barrier.remaining -= 1;
        if barrier.remaining > 0 {
            return Ok(None);
        }
        let barrier = state
            .chords
            .remove(&chord_id)
            .expect("barrier present: checked above");
        let outcomes = barrier.slots.into_iter().flatten().collect();
        Ok(Some(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskError, TaskStatus};
    use serde_json::json;

    fn store() -> InMemoryResultStore {
        InMemoryResultStore::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = store();
        assert!(store.get(TaskId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = store();
        let id = TaskId::generate();
        store.create(id).await.unwrap();
        store.set_status(id, StatusUpdate::Started).await.unwrap();
        store.create(id).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Started);
    }

    #[tokio::test]
    async fn terminal_status_is_stable_across_reads() {
        let store = store();
        let id = TaskId::generate();
        store.create(id).await.unwrap();
        store
            .set_status(id, StatusUpdate::Completed(json!("done")))
            .await
            .unwrap();

        let first = store.get(id).await.unwrap().unwrap();
        let second = store.get(id).await.unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Completed);
        assert_eq!(first.result, second.result);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn expired_terminal_results_are_evicted() {
        let store = InMemoryResultStore::new(Duration::ZERO);
        let id = TaskId::generate();
        store.create(id).await.unwrap();
        store
            .set_status(id, StatusUpdate::Completed(json!(1)))
            .await
            .unwrap();

        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_results_never_expire() {
        let store = InMemoryResultStore::new(Duration::ZERO);
        let id = TaskId::generate();
        store.create(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn chord_barrier_fires_exactly_once_in_declaration_order() {
        let store = store();
        let chord = ChordId::generate();
        store.init_chord(chord, 2).await.unwrap();

        // Member 1 finishes before member 0; gathered order must still be
        // declaration order.
        let first = store
            .complete_chord_member(chord, 1, Ok(json!(5)))
            .await
            .unwrap();
        assert!(first.is_none());

        let second = store
            .complete_chord_member(chord, 0, Ok(json!(15)))
            .await
            .unwrap();
        let outcomes = second.unwrap();
        assert_eq!(outcomes, vec![Ok(json!(15)), Ok(json!(5))]);
    }

    #[tokio::test]
    async fn redelivered_member_does_not_fire_twice() {
        let store = store();
        let chord = ChordId::generate();
        store.init_chord(chord, 1).await.unwrap();

        let fired = store
            .complete_chord_member(chord, 0, Ok(json!(1)))
            .await
            .unwrap();
        assert!(fired.is_some());

        let again = store
            .complete_chord_member(chord, 0, Ok(json!(1)))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn failed_member_contributes_its_error() {
        let store = store();
        let chord = ChordId::generate();
        store.init_chord(chord, 2).await.unwrap();

        store
            .complete_chord_member(chord, 0, Ok(json!(15)))
            .await
            .unwrap();
        let outcomes = store
            .complete_chord_member(chord, 1, Err(TaskError::permanent("division by zero")))
            .await
            .unwrap()
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
    }
}
