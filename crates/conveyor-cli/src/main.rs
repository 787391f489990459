//! Demo binary: wires the engine with the arithmetic demo tasks, runs a
//! worker pool in-process, and exercises single tasks, a retrying failure,
//! a chain, and a chord.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use conveyor_core::{
    Engine, EngineConfig, QueueRouter, RetryOn, TaskDefinition, TaskError, TaskHandler,
    TaskRegistry, TaskSpec,
};

fn number(args: &[Value], index: usize) -> Result<f64, TaskError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| TaskError::permanent(format!("argument {index} is not a number")))
}

/// `tasks.process_data`: pretends to chew on a payload for a while.
struct ProcessDataHandler;

#[async_trait]
impl TaskHandler for ProcessDataHandler {
    async fn run(&self, args: &[Value], _kw: &Map<String, Value>) -> Result<Value, TaskError> {
        let data = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::permanent("argument 0 is not a string"))?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!(format!("Processed: {data}")))
    }
}

/// `tasks.add_numbers`.
struct AddNumbersHandler;

#[async_trait]
impl TaskHandler for AddNumbersHandler {
    async fn run(&self, args: &[Value], _kw: &Map<String, Value>) -> Result<Value, TaskError> {
        Ok(json!(number(args, 0)? + number(args, 1)?))
    }
}

/// `tasks.divide_numbers`: division by zero is a transient failure here, so
/// the retry executor gets something to do.
struct DivideNumbersHandler;

#[async_trait]
impl TaskHandler for DivideNumbersHandler {
    async fn run(&self, args: &[Value], _kw: &Map<String, Value>) -> Result<Value, TaskError> {
        let x = number(args, 0)?;
        let y = number(args, 1)?;
        if y == 0.0 {
            return Err(TaskError::transient("division by zero"));
        }
        Ok(json!(x / y))
    }
}

/// `tasks.aggregate_results`: sums the numeric entries of its carried array.
struct AggregateResultsHandler;

#[async_trait]
impl TaskHandler for AggregateResultsHandler {
    async fn run(&self, args: &[Value], _kw: &Map<String, Value>) -> Result<Value, TaskError> {
        let items = args
            .first()
            .and_then(Value::as_array)
            .ok_or_else(|| TaskError::permanent("argument 0 is not an array"))?;
        let sum: f64 = items.iter().filter_map(Value::as_f64).sum();
        Ok(json!(sum))
    }
}

fn build_router() -> QueueRouter {
    let mut router = QueueRouter::new("default");
    router.declare_queue("calculations", "Arithmetic demo tasks");
    router.declare_queue("documents", "PDF loading and chunking");
    router.declare_queue("rag", "Vector-store queries");
    router.add_route("tasks.process_data", "default");
    router.add_route("tasks.add_numbers", "calculations");
    router.add_route("tasks.divide_numbers", "calculations");
    router.add_route("tasks.aggregate_results", "calculations");
    router.add_route("tasks.load_pdf", "documents");
    router.add_route("tasks.split_documents", "documents");
    router.add_route("tasks.create_vectorstore", "documents");
    router.add_route("tasks.query_vectorstore", "rag");
    router
}

fn build_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    let registrations = [
        TaskDefinition::new("tasks.process_data", Arc::new(ProcessDataHandler)),
        TaskDefinition::new("tasks.add_numbers", Arc::new(AddNumbersHandler)),
        TaskDefinition::new("tasks.divide_numbers", Arc::new(DivideNumbersHandler))
            .with_max_retries(5)
            .with_retry_on(RetryOn::TransientOnly),
        TaskDefinition::new("tasks.aggregate_results", Arc::new(AggregateResultsHandler)),
    ];
    for definition in registrations {
        registry
            .register(definition)
            .expect("demo task names are unique");
    }
    registry
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = EngineConfig {
        // Short backoff so the retry demo settles in seconds.
        retry_base_delay_ms: 100,
        ..EngineConfig::default()
    };
    let engine = Engine::in_memory(
        Arc::new(build_registry()),
        Arc::new(build_router()),
        config,
    );
    let pool = engine.spawn_workers();

    for queue in engine.list_queues() {
        info!(queue = %queue.name, description = %queue.description, "queue declared");
    }
    for (task, queue) in engine.list_routes() {
        info!(%task, %queue, "route");
    }

    // Single task.
    let id = engine
        .submit(TaskSpec::new("tasks.add_numbers").arg(10).arg(20))
        .await
        .expect("enqueue add");
    let result = engine.wait(id, 200).await.expect("add settles");
    info!(%id, result = %json!(result.result), "add_numbers finished");

    // Chain: add(10, 20) then divide(_, 5).
    let chain_id = engine
        .submit_chain(vec![
            TaskSpec::new("tasks.add_numbers").arg(10).arg(20),
            TaskSpec::new("tasks.divide_numbers").arg(5),
        ])
        .await
        .expect("enqueue chain");
    let chain = engine.wait(chain_id, 400).await.expect("chain settles");
    info!(%chain_id, result = %json!(chain.result), "chain finished");

    // Chord: {add(10, 5), divide(10, 2)} feeding aggregate_results.
    let chord_id = engine
        .submit_chord(
            vec![
                TaskSpec::new("tasks.add_numbers").arg(10).arg(5),
                TaskSpec::new("tasks.divide_numbers").arg(10).arg(2),
            ],
            TaskSpec::new("tasks.aggregate_results"),
        )
        .await
        .expect("enqueue chord");
    let chord = engine.wait(chord_id, 400).await.expect("chord settles");
    info!(%chord_id, result = %json!(chord.result), "chord finished");

    // Retry demo: divide(10, 0) retries five times with exponential backoff,
    // then settles Failed with the captured error.
    let failing_id = engine
        .submit(TaskSpec::new("tasks.divide_numbers").arg(10).arg(0))
        .await
        .expect("enqueue failing divide");
    let failed = engine.wait(failing_id, 2_000).await.expect("divide settles");
    info!(
        %failing_id,
        status = %failed.status,
        error = %json!(failed.error),
        "failing divide finished"
    );

    pool.shutdown_and_join().await;
}
