//! Result store: durable task-id -> status/result mapping shared by all
//! producers and dispatchers.

mod memory;

pub use memory::InMemoryResultStore;

use async_trait::async_trait;

use crate::domain::{ChordId, EngineError, MemberOutcome, StatusUpdate, TaskId, TaskResult};

/// Result store port.
///
/// The store is the single source of truth across processes, so an
/// implementation must back it with shared storage and provide atomic
/// create/update primitives. The chord barrier lives here too: its
/// decrement-and-gather must be linearizable per chord so the callback fires
/// exactly once.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create the initial `Pending` record. Idempotent: a no-op if the id is
    /// already present.
    async fn create(&self, task_id: TaskId) -> Result<(), EngineError>;

    /// Apply a status transition. Updates against a terminal record are
    /// ignored by the store.
    async fn set_status(&self, task_id: TaskId, update: StatusUpdate) -> Result<(), EngineError>;

    /// Point-in-time read. `Ok(None)` means the id was never recorded or has
    /// expired; that is distinct from a `Pending` record.
    async fn get(&self, task_id: TaskId) -> Result<Option<TaskResult>, EngineError>;

    /// Initialize a chord barrier with the header size.
    async fn init_chord(&self, chord_id: ChordId, size: usize) -> Result<(), EngineError>;

    /// Record one header member's terminal outcome and decrement the barrier.
    ///
    /// Returns `Ok(Some(outcomes))` exactly once, to the caller that settles
    /// the last outstanding member; outcomes follow header-declaration order.
    /// Re-recording an already-settled position is a no-op returning
    /// `Ok(None)`, which keeps redelivered members from double-firing the
    /// callback.
    async fn complete_chord_member(
        &self,
        chord_id: ChordId,
        position: usize,
        outcome: MemberOutcome,
    ) -> Result<Option<Vec<MemberOutcome>>, EngineError>;
}
