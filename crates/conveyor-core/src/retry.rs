//! Retry policy: decides whether a failed attempt is re-enqueued and with
//! what backoff delay.
//!
//! The delay is applied as a minimum re-visibility delay on re-enqueue, never
//! as a blocking sleep inside a worker.

use std::time::Duration;

use rand::Rng;

use crate::domain::{FailureKind, TaskError, TaskSubmission};
use crate::registry::{RetryOn, TaskDefinition};

/// Exponential backoff policy.
///
/// `delay = base_delay * multiplier^retries_so_far`, plus a small
/// multiplicative jitter so that a burst of failures does not re-arrive as a
/// burst. With multiplier >= 2 the jitter never breaks strict monotonicity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1)`: the computed delay is scaled by a random
    /// factor in `[1, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Whether this failure should be retried.
    ///
    /// Retry is permitted while `retries_so_far < max_retries` and the
    /// definition's classification allows the failure kind. Registry misses
    /// are never retried: no amount of waiting registers the handler.
    pub fn should_retry(
        &self,
        definition: &TaskDefinition,
        submission: &TaskSubmission,
        error: &TaskError,
    ) -> bool {
        if error.kind == FailureKind::UnknownTask {
            return false;
        }
        if submission.retries_so_far >= definition.max_retries {
            return false;
        }
        match definition.retry_on {
            RetryOn::AnyFailure => true,
            RetryOn::TransientOnly => {
                matches!(error.kind, FailureKind::Transient | FailureKind::TimeLimit)
            }
        }
    }

    /// Backoff delay before the re-enqueued submission becomes visible.
    pub fn backoff_delay(&self, retries_so_far: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let mut delay = base * self.multiplier.powi(retries_so_far as i32);
        if self.jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
            delay *= factor;
        }
        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::Map;
    use std::sync::Arc;

    use crate::domain::TaskId;
    use crate::registry::TaskHandler;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl TaskHandler for NoopHandler {
        async fn run(
            &self,
            _args: &[serde_json::Value],
            _kwargs: &Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, TaskError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn definition(max_retries: u32, retry_on: RetryOn) -> TaskDefinition {
        TaskDefinition::new("tasks.divide_numbers", Arc::new(NoopHandler))
            .with_max_retries(max_retries)
            .with_retry_on(retry_on)
    }

    fn submission(retries_so_far: u32) -> TaskSubmission {
        TaskSubmission {
            task_id: TaskId::generate(),
            task_name: "tasks.divide_numbers".to_string(),
            args: vec![],
            kwargs: Map::new(),
            queue: "calculations".to_string(),
            retries_so_far,
            continuation: vec![],
            chord: None,
        }
    }

    #[rstest]
    #[case(0, Duration::from_secs(2))]
    #[case(1, Duration::from_secs(4))]
    #[case(2, Duration::from_secs(8))]
    #[case(4, Duration::from_secs(32))]
    fn backoff_doubles_per_retry(#[case] retries: u32, #[case] expected: Duration) {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(retries), expected);
    }

    #[test]
    fn backoff_is_strictly_increasing_with_jitter() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for retries in 0..5 {
            let delay = policy.backoff_delay(retries);
            assert!(delay > previous, "delay must grow at retry {retries}");
            previous = delay;
        }
    }

    #[test]
    fn retries_stop_at_max() {
        let policy = RetryPolicy::default();
        let def = definition(5, RetryOn::AnyFailure);
        let err = TaskError::transient("flaky");

        assert!(policy.should_retry(&def, &submission(4), &err));
        assert!(!policy.should_retry(&def, &submission(5), &err));
    }

    #[rstest]
    #[case(RetryOn::AnyFailure, FailureKind::Permanent, true)]
    #[case(RetryOn::TransientOnly, FailureKind::Permanent, false)]
    #[case(RetryOn::TransientOnly, FailureKind::Transient, true)]
    #[case(RetryOn::TransientOnly, FailureKind::TimeLimit, true)]
    fn classification_is_a_definition_property(
        #[case] retry_on: RetryOn,
        #[case] kind: FailureKind,
        #[case] expected: bool,
    ) {
        let policy = RetryPolicy::default();
        let def = definition(5, retry_on);
        let err = TaskError {
            kind,
            message: "boom".to_string(),
        };
        assert_eq!(policy.should_retry(&def, &submission(0), &err), expected);
    }

    #[test]
    fn unknown_task_is_never_retried() {
        let policy = RetryPolicy::default();
        let def = definition(5, RetryOn::AnyFailure);
        let err = TaskError::unknown_task("tasks.missing");
        assert!(!policy.should_retry(&def, &submission(0), &err));
    }
}
