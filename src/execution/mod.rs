//! Plan execution: the step executor seam and the bounded-concurrency pool.

mod executor;
mod pool;

pub use executor::{
    CancelReason, FnExecutor, StepError, StepExecutor, execute_with_deadline, executor_fn,
};
pub use pool::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_STEP_TIMEOUT_MS, ExecutionPool, PoolConfig, PoolResult,
    StepResult, StepStatus,
};
