pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod learning;
pub mod mission;
pub mod planning;
pub mod ratelimit;
pub mod storage;
pub mod testing;
pub mod tools;
pub mod verification;

pub use config::{ConfigError, ConfigLoader, OverseerConfig};
pub use core::plan::{ComplexityTier, MissionPlan, PlanValidationError, Step};
pub use core::retry::RetryPolicy;
pub use core::task::{NewTask, Priority, Task, TaskPatch, TaskStats, TaskStatus};
pub use core::types::{MissionId, StepId, TaskId};
pub use events::{Event, EventBus, EventHandler, LoggingHandler};
pub use execution::{
    CancelReason, ExecutionPool, PoolConfig, PoolResult, StepError, StepExecutor, StepResult,
    StepStatus,
};
pub use learning::{JsonlPatternStore, LearningRecord, MemoryPatternStore, PatternStore};
pub use mission::{
    MissionContext, MissionResult, MissionState, Overseer, OverseerError, retry_plan,
};
pub use planning::{PlanBuilder, PlanError, PlanRequest, Planner, PlannerResponse, TemplatePlanner};
pub use ratelimit::{RateLimitDecision, RateLimitError, RateLimitTier, RateLimiter, TierRules};
pub use storage::{JsonlLog, MemoryLog, StoreError, TaskLog, TaskStore};
pub use tools::{ToolError, ToolHandler, ToolRegistry};
pub use verification::{CheckVerifier, VerificationReport, Verifier, VerifierError};
