//! Step execution seam.
//!
//! A [`StepExecutor`] runs one step's tool with its payload. The pool wraps
//! every invocation with [`execute_with_deadline`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::core::plan::Step;
use crate::core::types::StepId;

/// Why a step was never dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "step", rename_all = "snake_case")]
pub enum CancelReason {
    /// The pool-wide cancellation signal fired before dispatch.
    PoolCancelled,
    /// A transitive dependency failed.
    UpstreamFailed(StepId),
    /// The step's dependencies can never be satisfied.
    Unschedulable,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::PoolCancelled => write!(f, "pool cancelled"),
            CancelReason::UpstreamFailed(id) => write!(f, "upstream step '{}' failed", id),
            CancelReason::Unschedulable => write!(f, "dependencies can never be satisfied"),
        }
    }
}

/// Errors a step can end with.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The step exceeded its deadline.
    #[error("step timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The executor returned an error.
    #[error("step failed: {message}")]
    Failed { message: String },

    /// The step never ran.
    #[error("step cancelled: {reason}")]
    Cancelled { reason: CancelReason },
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

/// Runs a single step. Implementations must be safe to call concurrently.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step) -> Result<Value, StepError>;
}

/// Adapter turning an async closure into a [`StepExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap an async closure as a step executor.
///
/// ```
/// use overseer::execution::executor_fn;
/// use serde_json::json;
///
/// let exec = executor_fn(|step| async move { Ok(json!({ "ran": step.id.as_str() })) });
/// # let _ = exec;
/// ```
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(Step) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    async fn execute(&self, step: &Step) -> Result<Value, StepError> {
        (self.f)(step.clone()).await
    }
}

/// Run a step, failing with [`StepError::Timeout`] once `deadline` passes.
/// The executor's future is dropped on timeout.
pub async fn execute_with_deadline(
    executor: &dyn StepExecutor,
    step: &Step,
    deadline: Duration,
) -> Result<Value, StepError> {
    match tokio::time::timeout(deadline, executor.execute(step)).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout {
            after_ms: deadline.as_millis() as u64,
        }),
    }
}
