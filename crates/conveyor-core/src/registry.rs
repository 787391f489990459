//! Task registry: task name -> handler + execution policy.
//!
//! Design:
//! - Built during process warm-up (mutable).
//! - Shared behind an `Arc` into each worker afterwards (immutable).
//! No locks needed at dispatch time; tests get isolated registries instead of
//! ambient global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::{EngineError, TaskError};

/// A task body. Implemented by the excluded collaborators (PDF ingestion,
/// chunking, querying, ...); the engine treats it as an opaque callable.
///
/// Must be safe to invoke more than once: at-least-once delivery and retry
/// both imply possible re-execution.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, TaskError>;
}

/// Which handler failures the retry executor may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    /// Retry any failure (time limits included).
    AnyFailure,
    /// Retry only failures the handler classified as transient, plus time
    /// limits. Permanent failures settle `Failed` immediately.
    TransientOnly,
}

/// Immutable registration of one task: handler plus retry/time-limit policy.
#[derive(Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub max_retries: u32,
    pub time_limit: Duration,
    pub retry_on: RetryOn,
}

impl TaskDefinition {
    /// Defaults follow the original deployment: 3 retries, a one-hour
    /// per-attempt time limit, transient-only retry.
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            max_retries: 3,
            time_limit: Duration::from_secs(3600),
            retry_on: RetryOn::TransientOnly,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }
}

/// Registry of task definitions (task name -> definition).
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Register a definition. Duplicate names are an error: two handlers
    /// silently shadowing each other is how work goes missing.
    pub fn register(&mut self, definition: TaskDefinition) -> Result<(), EngineError> {
        if self.tasks.contains_key(&definition.name) {
            return Err(EngineError::DuplicateTask(definition.name));
        }
        self.tasks.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Look up a definition by name. `None` means the consuming process has
    /// no such task; the dispatcher routes that submission to `Failed`.
    pub fn resolve(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    /// Registered task names, sorted for stable introspection output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn run(
            &self,
            _args: &[Value],
            _kwargs: &Map<String, Value>,
        ) -> Result<Value, TaskError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn register_then_resolve() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskDefinition::new("tasks.add_numbers", Arc::new(OkHandler)))
            .unwrap();

        let def = reg.resolve("tasks.add_numbers").unwrap();
        assert_eq!(def.name, "tasks.add_numbers");
        assert_eq!(def.max_retries, 3);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskDefinition::new("tasks.add_numbers", Arc::new(OkHandler)))
            .unwrap();
        let err = reg
            .register(TaskDefinition::new("tasks.add_numbers", Arc::new(OkHandler)))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(_)));
    }

    #[test]
    fn resolve_miss_is_none() {
        let reg = TaskRegistry::new();
        assert!(reg.resolve("tasks.missing").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskDefinition::new("b", Arc::new(OkHandler)))
            .unwrap();
        reg.register(TaskDefinition::new("a", Arc::new(OkHandler)))
            .unwrap();
        assert_eq!(reg.names(), vec!["a", "b"]);
    }
}
