use crate::error::StageError;
use crate::pipeline::StageKind;

/// Decides whether a failed stage attempt is tried again.
///
/// The coordinator is fail-fast; [`NoRetry`] is the default and any other
/// policy has to be opted into with `PipelineExecutor::with_retry_policy`.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is 1 for the first execution of the stage.
    fn should_retry(&self, kind: StageKind, attempt: u32, error: &StageError) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _kind: StageKind, _attempt: u32, _error: &StageError) -> bool {
        false
    }
}

/// Retries only the given stage kinds, up to `max_attempts` executions in total.
/// Test failures and authentication errors are never retried.
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    pub max_attempts: u32,
    pub kinds: Vec<StageKind>,
}

impl RetryPolicy for BoundedRetry {
    fn should_retry(&self, kind: StageKind, attempt: u32, error: &StageError) -> bool {
        if matches!(error, StageError::TestFailure { .. } | StageError::Auth { .. }) {
            return false;
        }
        self.kinds.contains(&kind) && attempt < self.max_attempts
    }
}
