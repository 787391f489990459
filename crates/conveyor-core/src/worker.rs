//! Worker pool: claims submissions from subscribed queues, executes handlers,
//! reports outcomes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::domain::{EngineError, StatusUpdate, TaskError, TaskSubmission};
use crate::registry::TaskRegistry;
use crate::results::ResultStore;
use crate::retry::RetryPolicy;
use crate::workflow;

/// Handle over a fixed-size pool of workers.
/// - `request_shutdown` stops workers from taking new claims; in-flight
///   handler execution is not cancelled (there is no mid-flight cancellation
///   in this engine; cooperative checks belong inside handlers).
/// - `shutdown_and_join` waits for all workers to drain.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

/// Everything one worker needs; cheap to clone per spawned worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<TaskRegistry>,
    pub results: Arc<dyn ResultStore>,
    pub retry_policy: RetryPolicy,
    /// Queues this pool subscribes to.
    pub queues: Vec<String>,
    /// How long one claim call blocks when no work is available.
    pub dequeue_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `n` workers over the given context.
    pub fn spawn(n: usize, context: WorkerContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let ctx = context.clone();
            let mut rx = shutdown_rx.clone();
            let join = tokio::spawn(async move {
                worker_loop(worker_id, ctx, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext, shutdown_rx: &mut watch::Receiver<bool>) {
    debug!(worker_id, queues = ?ctx.queues, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // A claim may block; race it against shutdown.
        let claimed = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            claimed = ctx.broker.dequeue(&ctx.queues, ctx.dequeue_timeout) => claimed,
        };

        let delivery = match claimed {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(err) => {
                // Broker trouble is an infrastructure error: back off and
                // let the loop try again rather than crash the worker.
                warn!(worker_id, %err, "dequeue failed");
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
        };

        if let Err(err) = process_delivery(worker_id, &ctx, delivery).await {
            error!(worker_id, %err, "failed to record task outcome");
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Drive one claimed submission through
/// `Started -> {Completed | Failed | Retrying}`.
async fn process_delivery(
    worker_id: usize,
    ctx: &WorkerContext,
    delivery: Box<dyn Delivery>,
) -> Result<(), EngineError> {
    let submission = delivery.submission().clone();
    let task_id = submission.task_id;

    let Some(definition) = ctx.registry.resolve(&submission.task_name) else {
        // Registry miss: fatal for this submission, not for the worker.
        let err = TaskError::unknown_task(&submission.task_name);
        warn!(worker_id, %task_id, task = %submission.task_name, "unknown task");
        ctx.results
            .set_status(task_id, StatusUpdate::Failed(err.clone()))
            .await?;
        workflow::advance_on_failure(&ctx.broker, &ctx.results, &submission, &err).await?;
        return delivery.ack().await;
    };

    ctx.results
        .set_status(task_id, StatusUpdate::Started)
        .await?;
    debug!(worker_id, %task_id, task = %submission.task_name, "started");

    let attempt = tokio::time::timeout(
        definition.time_limit,
        definition
            .handler
            .run(&submission.args, &submission.kwargs),
    )
    .await;
    let outcome = match attempt {
        Ok(result) => result,
        Err(_elapsed) => Err(TaskError::time_limit(definition.time_limit)),
    };

    match outcome {
        Ok(value) => {
            info!(worker_id, %task_id, task = %submission.task_name, "completed");
            ctx.results
                .set_status(task_id, StatusUpdate::Completed(value.clone()))
                .await?;
            workflow::advance_on_success(&ctx.broker, &ctx.results, &submission, &value).await?;
        }
        Err(task_error) => {
            if ctx
                .retry_policy
                .should_retry(definition, &submission, &task_error)
            {
                let delay = ctx.retry_policy.backoff_delay(submission.retries_so_far);
                warn!(
                    worker_id, %task_id, task = %submission.task_name,
                    attempt = submission.retries_so_far + 1,
                    max_retries = definition.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %task_error,
                    "retrying"
                );
                ctx.results
                    .set_status(task_id, StatusUpdate::Retrying)
                    .await?;
                let retry = retried(submission);
                ctx.broker.enqueue(retry, delay).await?;
            } else {
                warn!(
                    worker_id, %task_id, task = %submission.task_name,
                    error = %task_error,
                    "failed"
                );
                ctx.results
                    .set_status(task_id, StatusUpdate::Failed(task_error.clone()))
                    .await?;
                workflow::advance_on_failure(&ctx.broker, &ctx.results, &submission, &task_error)
                    .await?;
            }
        }
    }

    delivery.ack().await
}

/// The re-enqueued copy of a failed submission. The retry count is the only
/// field that ever changes across a submission's lifetime.
fn retried(mut submission: TaskSubmission) -> TaskSubmission {
    submission.retries_so_far += 1;
    submission
}
