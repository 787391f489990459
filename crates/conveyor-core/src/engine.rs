//! Engine facade: the producer-side API.
//!
//! Submission, workflow composition, and status lookup. All coordination with
//! workers flows through the `Broker` and `ResultStore` ports; the engine
//! holds no execution state of its own.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::broker::{Broker, InMemoryBroker};
use crate::config::EngineConfig;
use crate::domain::{ChordId, ChordMembership, EngineError, TaskId, TaskResult};
use crate::registry::TaskRegistry;
use crate::results::{InMemoryResultStore, ResultStore};
use crate::router::{QueueInfo, QueueRouter};
use crate::worker::{WorkerContext, WorkerPool};
use crate::workflow::TaskSpec;

pub struct Engine {
    broker: Arc<dyn Broker>,
    results: Arc<dyn ResultStore>,
    registry: Arc<TaskRegistry>,
    router: Arc<QueueRouter>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        broker: Arc<dyn Broker>,
        results: Arc<dyn ResultStore>,
        registry: Arc<TaskRegistry>,
        router: Arc<QueueRouter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            broker,
            results,
            registry,
            router,
            config,
        }
    }

    /// Single-process wiring: in-memory broker and result store built from
    /// the config. The seam for real transports is `Engine::new`.
    pub fn in_memory(
        registry: Arc<TaskRegistry>,
        router: Arc<QueueRouter>,
        config: EngineConfig,
    ) -> Self {
        let broker = Arc::new(InMemoryBroker::new(config.visibility_timeout()));
        let results = Arc::new(InMemoryResultStore::new(config.result_expiry()));
        Self::new(broker, results, registry, router, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Context for a worker pool subscribed to every declared queue.
    pub fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            broker: Arc::clone(&self.broker),
            registry: Arc::clone(&self.registry),
            results: Arc::clone(&self.results),
            retry_policy: self.config.retry_policy(),
            queues: self.router.queue_names(),
            dequeue_timeout: self.config.dequeue_timeout(),
        }
    }

    /// Spawn the configured number of workers in this process.
    pub fn spawn_workers(&self) -> WorkerPool {
        WorkerPool::spawn(self.config.workers, self.worker_context())
    }

    /// Enqueue one task. The `Pending` result is created before the enqueue,
    /// so a successfully submitted id always resolves to at least `Pending`.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, EngineError> {
        let step = spec.plan(&self.router);
        let task_id = step.task_id;
        self.results.create(task_id).await?;
        info!(%task_id, task = %step.task_name, queue = %step.queue, "submitted");
        self.broker
            .enqueue(step.into_submission(None), Duration::ZERO)
            .await?;
        Ok(task_id)
    }

    /// Point-in-time status read. `Ok(None)` is NotFound: the id was never
    /// recorded or its result has expired, which is distinct from `Pending`.
    pub async fn status(&self, task_id: TaskId) -> Result<Option<TaskResult>, EngineError> {
        self.results.get(task_id).await
    }

    /// Poll until the task settles, at the configured interval, giving up
    /// after `max_attempts` reads. Giving up abandons nothing: in-flight work
    /// runs to completion and its result stays retrievable until expiry.
    pub async fn wait(
        &self,
        task_id: TaskId,
        max_attempts: usize,
    ) -> Result<TaskResult, EngineError> {
        for _ in 0..max_attempts {
            if let Some(result) = self.results.get(task_id).await? {
                if result.status.is_terminal() {
                    return Ok(result);
                }
            }
            tokio::time::sleep(self.config.wait_interval()).await;
        }
        Err(EngineError::WaitTimeout(task_id))
    }

    /// Submit a sequential chain. Step *i+1* is enqueued only once step *i*
    /// completes, with the prior result spliced into its carry slot; a failed
    /// step short-circuits the rest.
    ///
    /// Returns the **last** step's id: polling it yields `Pending` while the
    /// chain runs, then the final result (or the failing step's error if the
    /// chain short-circuited).
    pub async fn submit_chain(&self, steps: Vec<TaskSpec>) -> Result<TaskId, EngineError> {
        if steps.is_empty() {
            return Err(EngineError::EmptyWorkflow);
        }
        let mut planned: Vec<_> = steps.into_iter().map(|s| s.plan(&self.router)).collect();
        for step in &planned {
            self.results.create(step.task_id).await?;
        }
        let last_id = planned.last().expect("chain is non-empty").task_id;
        let first = planned.remove(0);
        info!(
            chain_id = %last_id,
            steps = planned.len() + 1,
            head = %first.task_name,
            "chain submitted"
        );
        let mut submission = first.into_submission(None);
        submission.continuation = planned;
        self.broker.enqueue(submission, Duration::ZERO).await?;
        Ok(last_id)
    }

    /// Submit an unordered group. Members run concurrently and independently;
    /// ids are returned in declaration order. The group is complete when every
    /// member's result is terminal.
    pub async fn submit_group(&self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>, EngineError> {
        if specs.is_empty() {
            return Err(EngineError::EmptyWorkflow);
        }
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.submit(spec).await?);
        }
        Ok(ids)
    }

    /// Submit a chord: a group header plus a callback that fires exactly once
    /// after every header member is terminal, receiving the header's results
    /// in declaration order (failed members contribute their error).
    ///
    /// Returns the callback's id.
    pub async fn submit_chord(
        &self,
        header: Vec<TaskSpec>,
        callback: TaskSpec,
    ) -> Result<TaskId, EngineError> {
        if header.is_empty() {
            return Err(EngineError::EmptyWorkflow);
        }
        let planned_header: Vec<_> = header.into_iter().map(|s| s.plan(&self.router)).collect();
        let planned_callback = callback.plan(&self.router);
        let callback_id = planned_callback.task_id;
        let size = planned_header.len();
        let chord_id = ChordId::generate();

        // Barrier and Pending results exist before any member is visible.
        self.results.init_chord(chord_id, size).await?;
        self.results.create(callback_id).await?;
        for step in &planned_header {
            self.results.create(step.task_id).await?;
        }
        info!(%chord_id, header = size, callback = %planned_callback.task_name, "chord submitted");

        for (position, step) in planned_header.into_iter().enumerate() {
            let mut submission = step.into_submission(None);
            submission.chord = Some(ChordMembership {
                chord_id,
                position,
                callback: planned_callback.clone(),
            });
            self.broker.enqueue(submission, Duration::ZERO).await?;
        }
        Ok(callback_id)
    }

    pub fn list_queues(&self) -> &[QueueInfo] {
        self.router.list_queues()
    }

    pub fn list_routes(&self) -> &BTreeMap<String, String> {
        self.router.list_routes()
    }
}
