//! Testing utilities for users of the overseer library.
//!
//! Deterministic stand-ins for every collaborator the overseer talks to:
//!
//! - [`StaticPlanner`] / [`FailingPlanner`]: fixed planner output or a planner error
//! - [`ScriptedExecutor`]: per-step delays and outcomes with a recorded timeline
//! - [`FlakyTool`]: a tool that fails N times then succeeds
//! - [`FixedVerifier`] / [`FailingVerifier`]: fixed verification verdicts
//! - [`FailingPatternStore`], [`UnavailableBackend`]: collaborators that are always down

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::core::plan::{ComplexityTier, MissionPlan, Step};
use crate::core::types::StepId;
use crate::execution::{PoolResult, StepError, StepExecutor};
use crate::learning::{LearningError, LearningRecord, PatternStore};
use crate::planning::{PlanError, PlanRequest, Planner, PlannerResponse};
use crate::ratelimit::{CounterBackend, RateLimitError, RateLimitRule, WindowState};
use crate::tools::{ToolError, ToolHandler};
use crate::verification::{CheckResult, VerificationReport, Verifier, VerifierError};

/// Planner that always returns the same response and remembers what it was asked.
///
/// # Example
///
/// ```
/// use overseer::core::plan::Step;
/// use overseer::testing::StaticPlanner;
///
/// let planner = StaticPlanner::from_steps("report", vec![
///     Step::new("fetch", "fetch data", "echo"),
///     Step::new("render", "render report", "echo").depends_on(["fetch"]),
/// ]);
/// assert_eq!(planner.response().steps.len(), 2);
/// ```
pub struct StaticPlanner {
    response: PlannerResponse,
    requests: Mutex<Vec<PlanRequest>>,
}

impl StaticPlanner {
    pub fn new(response: PlannerResponse) -> Self {
        Self {
            response,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Planner for a simple-tier plan with the given steps.
    pub fn from_steps(mission_type: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(PlannerResponse {
            mission_type: mission_type.into(),
            complexity: ComplexityTier::Simple,
            steps,
            reasoning: "static plan".to_string(),
        })
    }

    pub fn response(&self) -> &PlannerResponse {
        &self.response
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<PlannerResponse, PlanError> {
        self.requests.lock().await.push(request.clone());
        Ok(self.response.clone())
    }
}

/// Planner that always fails.
pub struct FailingPlanner {
    message: String,
}

impl FailingPlanner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<PlannerResponse, PlanError> {
        Err(PlanError::Planning(self.message.clone()))
    }
}

/// Observed execution window of one step.
#[derive(Debug, Clone, Copy)]
pub struct StepSpan {
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Clone)]
enum ScriptOutcome {
    Succeed(Value),
    Fail(String),
}

#[derive(Debug, Clone)]
struct StepScript {
    delay: Duration,
    outcome: ScriptOutcome,
}

#[derive(Default)]
struct Timeline {
    spans: HashMap<StepId, StepSpan>,
    calls: HashMap<StepId, u32>,
}

/// Step executor driven by per-step scripts.
///
/// Unscripted steps sleep for the default delay and succeed with
/// `{"step": <id>}`. Every finished invocation is recorded with its start and
/// finish instants, and the peak number of concurrently running steps is
/// tracked. Steps dropped by a timeout record no span.
pub struct ScriptedExecutor {
    scripts: HashMap<StepId, StepScript>,
    default_delay: Duration,
    timeline: Mutex<Timeline>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default_delay: Duration::ZERO,
            timeline: Mutex::new(Timeline::default()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    fn script(&mut self, step: impl Into<StepId>) -> &mut StepScript {
        let default_delay = self.default_delay;
        self.scripts
            .entry(step.into())
            .or_insert_with(|| StepScript {
                delay: default_delay,
                outcome: ScriptOutcome::Succeed(Value::Null),
            })
    }

    /// Make a step take `delay` to run.
    pub fn delay(mut self, step: impl Into<StepId>, delay: Duration) -> Self {
        self.script(step).delay = delay;
        self
    }

    /// Make a step fail with `message` after its delay.
    pub fn fail(mut self, step: impl Into<StepId>, message: impl Into<String>) -> Self {
        self.script(step).outcome = ScriptOutcome::Fail(message.into());
        self
    }

    /// Make a step succeed with `output` after its delay.
    pub fn output(mut self, step: impl Into<StepId>, output: Value) -> Self {
        self.script(step).outcome = ScriptOutcome::Succeed(output);
        self
    }

    pub async fn span(&self, step: &StepId) -> Option<StepSpan> {
        self.timeline.lock().await.spans.get(step).copied()
    }

    pub async fn spans(&self) -> HashMap<StepId, StepSpan> {
        self.timeline.lock().await.spans.clone()
    }

    /// How many times a step was invoked, finished or not.
    pub async fn call_count(&self, step: &StepId) -> u32 {
        self.timeline
            .lock()
            .await
            .calls
            .get(step)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of steps observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &Step) -> Result<Value, StepError> {
        let (delay, outcome) = match self.scripts.get(&step.id) {
            Some(script) => (script.delay, script.outcome.clone()),
            None => (
                self.default_delay,
                ScriptOutcome::Succeed(json!({ "step": step.id.as_str() })),
            ),
        };

        *self
            .timeline
            .lock()
            .await
            .calls
            .entry(step.id.clone())
            .or_insert(0) += 1;

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        let started = Instant::now();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let finished = Instant::now();

        self.timeline
            .lock()
            .await
            .spans
            .insert(step.id.clone(), StepSpan { started, finished });

        match outcome {
            ScriptOutcome::Succeed(Value::Null) => Ok(json!({ "step": step.id.as_str() })),
            ScriptOutcome::Succeed(value) => Ok(value),
            ScriptOutcome::Fail(message) => Err(StepError::failed(message)),
        }
    }
}

/// A tool that fails a set number of times, then succeeds.
///
/// ```
/// use overseer::testing::FlakyTool;
///
/// // Fails twice, succeeds on the third call.
/// let tool = FlakyTool::new(2);
/// ```
pub struct FlakyTool {
    state: Mutex<FlakyState>,
    total_failures: u32,
    error_message: String,
}

struct FlakyState {
    failures_remaining: u32,
    call_count: u32,
}

impl FlakyTool {
    pub fn new(fail_count: u32) -> Self {
        Self::with_error(fail_count, "intentional test failure")
    }

    pub fn with_error(fail_count: u32, message: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FlakyState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            total_failures: fail_count,
            error_message: message.into(),
        }
    }

    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.failures_remaining = self.total_failures;
        state.call_count = 0;
    }
}

#[async_trait]
impl ToolHandler for FlakyTool {
    async fn execute(&self, _payload: &Value) -> Result<Value, ToolError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            Err(ToolError::Failed(self.error_message.clone()))
        } else {
            Ok(json!({ "attempt": state.call_count }))
        }
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["flaky".to_string()]
    }
}

/// Verifier with a fixed verdict and score.
pub struct FixedVerifier {
    passed: bool,
    quality_score: f64,
    calls: AtomicU32,
}

impl FixedVerifier {
    pub fn passing(quality_score: f64) -> Self {
        Self {
            passed: true,
            quality_score,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(quality_score: f64) -> Self {
        Self {
            passed: false,
            quality_score,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for FixedVerifier {
    async fn verify(
        &self,
        _plan: &MissionPlan,
        _result: &PoolResult,
    ) -> Result<VerificationReport, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let check = if self.passed {
            CheckResult::pass("fixed", "fixed verdict")
        } else {
            CheckResult::fail("fixed", "fixed verdict")
        };
        Ok(VerificationReport::new(vec![check], self.quality_score))
    }
}

/// Verifier that always errors.
pub struct FailingVerifier {
    message: String,
}

impl FailingVerifier {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Verifier for FailingVerifier {
    async fn verify(
        &self,
        _plan: &MissionPlan,
        _result: &PoolResult,
    ) -> Result<VerificationReport, VerifierError> {
        Err(VerifierError::Failed(self.message.clone()))
    }
}

/// Pattern store whose reads and writes always fail.
#[derive(Debug, Default)]
pub struct FailingPatternStore;

#[async_trait]
impl PatternStore for FailingPatternStore {
    async fn record(&self, _record: LearningRecord) -> Result<(), LearningError> {
        Err(LearningError::Unavailable("pattern store offline".into()))
    }

    async fn history(
        &self,
        _mission_type: &str,
        _limit: usize,
    ) -> Result<Vec<LearningRecord>, LearningError> {
        Err(LearningError::Unavailable("pattern store offline".into()))
    }
}

/// Rate limit backend that is never reachable.
#[derive(Debug, Default)]
pub struct UnavailableBackend;

#[async_trait]
impl CounterBackend for UnavailableBackend {
    async fn hit(
        &self,
        _key: &str,
        _now_ms: u64,
        _rule: RateLimitRule,
    ) -> Result<WindowState, RateLimitError> {
        Err(RateLimitError::Backend("counter store offline".into()))
    }

    async fn purge_expired(&self, _now_ms: u64) -> Result<usize, RateLimitError> {
        Err(RateLimitError::Backend("counter store offline".into()))
    }
}
