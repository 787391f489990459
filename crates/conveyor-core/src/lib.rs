//! conveyor-core
//!
//! Distributed task-execution and workflow-composition engine.
//!
//! # Module layout
//! - **domain**: ids, submissions, results, errors
//! - **broker**: enqueue/dequeue transport port + in-memory implementation
//! - **results**: result store port (status/result lookup, chord barrier)
//! - **registry**: task name -> handler + retry/time-limit policy
//! - **router**: static task-name -> queue routing with introspection
//! - **retry**: backoff and retry decisions
//! - **worker**: fixed-size worker pool claiming from subscribed queues
//! - **workflow**: chain / group / chord composition
//! - **engine**: producer-side facade (submit, status, wait, compose)
//! - **config**: engine configuration

pub mod broker;
pub mod config;
pub mod domain;
pub mod engine;
pub mod registry;
pub mod results;
pub mod retry;
pub mod router;
pub mod worker;
pub mod workflow;

pub use broker::{Broker, Delivery, InMemoryBroker};
pub use config::EngineConfig;
pub use domain::{
    ChordId, EngineError, FailureKind, TaskError, TaskId, TaskResult, TaskStatus, TaskSubmission,
};
pub use engine::Engine;
pub use registry::{RetryOn, TaskDefinition, TaskHandler, TaskRegistry};
pub use results::{InMemoryResultStore, ResultStore};
pub use retry::RetryPolicy;
pub use router::{QueueInfo, QueueRouter};
pub use worker::{WorkerContext, WorkerPool};
pub use workflow::TaskSpec;
