//! Mission overseer: Plan -> Execute -> Verify -> (Retry | Escalate | Complete).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::plan::MissionPlan;
use crate::core::retry::RetryPolicy;
use crate::core::task::{NewTask, TaskPatch, TaskStatus};
use crate::core::types::{MissionId, StepId, TaskId};
use crate::events::{Event, EventBus};
use crate::execution::{ExecutionPool, PoolResult, StepExecutor, StepResult, StepStatus};
use crate::learning::{LearningOutcome, LearningRecord, PatternHint, PatternStore};
use crate::planning::{PlanBuilder, PlanError, PlanRequest};
use crate::storage::{StoreError, TaskStore};
use crate::verification::{VerificationReport, Verifier, VerifierError};

use super::state::{InvalidTransition, MissionState};

/// How many past records feed the planner's hints.
const HINT_HISTORY_LIMIT: usize = 50;

/// Tag applied to the mission's task when it escalates.
pub const ESCALATED_TAG: &str = "escalated";

#[derive(Debug, Error)]
pub enum OverseerError {
    #[error(transparent)]
    Planning(#[from] PlanError),

    #[error("verification error: {0}")]
    Verification(#[from] VerifierError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller input for one mission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionContext {
    #[serde(default)]
    pub mission_id: MissionId,
    pub mission: String,
    /// Known mission type, used to look up historical patterns.
    #[serde(default)]
    pub mission_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Test harness switch: verification of this mission always fails.
    #[serde(default)]
    pub force_failure: bool,
}

impl MissionContext {
    pub fn new(mission: impl Into<String>) -> Self {
        Self {
            mission_id: MissionId::new(),
            mission: mission.into(),
            ..Self::default()
        }
    }

    pub fn with_mission_type(mut self, mission_type: impl Into<String>) -> Self {
        self.mission_type = Some(mission_type.into());
        self
    }

    pub fn with_forced_failure(mut self) -> Self {
        self.force_failure = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub required: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionResult {
    pub mission_id: MissionId,
    pub mission_type: String,
    pub success: bool,
    pub state: MissionState,
    /// Outputs of completed steps keyed by step id.
    pub data: Value,
    pub cost: f64,
    pub duration_ms: u64,
    /// 0..=1.
    pub confidence: f64,
    pub artifacts: Vec<String>,
    pub uncertainties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    /// Executions performed, including the first.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub execution: PoolResult,
}

impl MissionResult {
    /// Map a pool run into a mission result. Confidence is the completed
    /// fraction until a verification report scales it.
    pub fn from_pool(plan: &MissionPlan, execution: PoolResult) -> Self {
        let data = Value::Object(execution.outputs());
        let mut result = Self {
            mission_id: plan.mission_id,
            mission_type: plan.mission_type.clone(),
            success: false,
            state: MissionState::Executing,
            data,
            cost: plan.estimated_cost,
            duration_ms: execution.total_duration_ms,
            confidence: completion_ratio(&execution),
            artifacts: collect_artifacts(&execution),
            uncertainties: Vec::new(),
            escalation: None,
            attempts: 1,
            quality_score: None,
            task_id: None,
            execution,
        };
        result.uncertainties = step_uncertainties(&result.execution);
        result
    }

    /// Fold a verification report into the result.
    pub fn apply_report(&mut self, report: &VerificationReport) {
        self.quality_score = Some(report.quality_score);
        self.confidence = completion_ratio(&self.execution) * report.quality_score / 100.0;
        self.uncertainties = step_uncertainties(&self.execution);
        self.uncertainties.extend(
            report
                .failed_checks()
                .into_iter()
                .map(|c| format!("{}: {}", c.name, c.detail)),
        );
    }

    fn replace_execution(&mut self, execution: PoolResult) {
        self.data = Value::Object(execution.outputs());
        self.artifacts = collect_artifacts(&execution);
        self.confidence = completion_ratio(&execution);
        self.uncertainties = step_uncertainties(&execution);
        self.execution = execution;
    }
}

fn completion_ratio(execution: &PoolResult) -> f64 {
    let total = execution.total();
    if total == 0 {
        1.0
    } else {
        execution.completed_count as f64 / total as f64
    }
}

/// Strings found under `artifact` or `artifacts` in step outputs.
fn collect_artifacts(execution: &PoolResult) -> Vec<String> {
    let mut artifacts = Vec::new();
    for output in execution.results.iter().filter_map(|r| r.output.as_ref()) {
        if let Some(a) = output.get("artifact").and_then(Value::as_str) {
            artifacts.push(a.to_string());
        }
        if let Some(list) = output.get("artifacts").and_then(Value::as_array) {
            artifacts.extend(list.iter().filter_map(Value::as_str).map(String::from));
        }
    }
    artifacts
}

fn step_uncertainties(execution: &PoolResult) -> Vec<String> {
    execution
        .results
        .iter()
        .filter(|r| r.status != StepStatus::Completed)
        .map(|r| match &r.error {
            Some(e) => format!("step '{}': {}", r.step_id, e),
            None => format!("step '{}' did not complete", r.step_id),
        })
        .collect()
}

/// Overlay a retry run onto the previous execution. Steps absent from the
/// retry keep their earlier result.
fn merge_executions(plan: &MissionPlan, previous: &PoolResult, latest: PoolResult) -> PoolResult {
    let mut results: Vec<StepResult> = Vec::with_capacity(plan.len());
    for step in &plan.steps {
        let chosen = latest
            .get(&step.id)
            .or_else(|| previous.get(&step.id))
            .cloned();
        if let Some(r) = chosen {
            results.push(r);
        }
    }
    let count = |status| results.iter().filter(|r| r.status == status).count();

    PoolResult {
        mission_id: plan.mission_id,
        completed_count: count(StepStatus::Completed),
        failed_count: count(StepStatus::Failed),
        cancelled_count: count(StepStatus::Cancelled),
        total_duration_ms: previous.total_duration_ms + latest.total_duration_ms,
        critical_path_ms: previous.critical_path_ms.max(latest.critical_path_ms),
        cancelled: latest.cancelled,
        results,
    }
}

/// Derive the plan for a retry: only the steps that did not complete, or the
/// whole plan if every step completed. Each payload gains `retryAttempt` and
/// `previousError`.
pub fn retry_plan(
    plan: &MissionPlan,
    previous: &PoolResult,
    report: &VerificationReport,
    attempt: u32,
) -> MissionPlan {
    let unfinished = previous.unfinished();
    let keep: HashSet<StepId> = if unfinished.is_empty() {
        plan.steps.iter().map(|s| s.id.clone()).collect()
    } else {
        unfinished
    };

    let fallback_reason = report
        .recommendations
        .first()
        .cloned()
        .unwrap_or_else(|| format!("quality score {:.1} below threshold", report.quality_score));

    let mut restricted = plan.restrict_to(&keep);
    for step in &mut restricted.steps {
        let previous_error = previous
            .get(&step.id)
            .and_then(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| fallback_reason.clone());

        let mut payload = match std::mem::take(&mut step.payload) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".into(), other);
                map
            }
        };
        payload.insert("retryAttempt".into(), Value::from(attempt));
        payload.insert("previousError".into(), Value::String(previous_error));
        step.payload = Value::Object(payload);
    }
    restricted
}

/// Drives missions through the state machine.
pub struct Overseer {
    builder: PlanBuilder,
    pool: ExecutionPool,
    executor: Arc<dyn StepExecutor>,
    verifier: Arc<dyn Verifier>,
    retry: RetryPolicy,
    patterns: Option<Arc<dyn PatternStore>>,
    store: Option<Arc<TaskStore>>,
    events: Option<Arc<EventBus>>,
    /// Background learning writes not yet finished.
    learning: TaskTracker,
}

impl Overseer {
    /// Create an overseer that executes steps through the builder's tool
    /// registry.
    pub fn new(builder: PlanBuilder, verifier: Arc<dyn Verifier>) -> Self {
        let executor: Arc<dyn StepExecutor> = builder.registry().clone();
        Self {
            builder,
            pool: ExecutionPool::default(),
            executor,
            verifier,
            retry: RetryPolicy::default(),
            patterns: None,
            store: None,
            events: None,
            learning: TaskTracker::new(),
        }
    }

    pub fn with_pool(mut self, pool: ExecutionPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pattern_store(mut self, patterns: Arc<dyn PatternStore>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Record each mission as a task in `store`.
    pub fn with_task_store(mut self, store: Arc<TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    /// Wait for every learning write started so far. Short-lived callers
    /// such as the CLI call this before the runtime shuts down.
    pub async fn flush_learning(&self) {
        self.learning.close();
        self.learning.wait().await;
        self.learning.reopen();
    }

    /// Build a plan, passing historical patterns for the mission type to the
    /// planner when a pattern store is attached.
    pub async fn plan(&self, ctx: &MissionContext) -> Result<MissionPlan, OverseerError> {
        let request = PlanRequest {
            mission_id: ctx.mission_id,
            mission: ctx.mission.clone(),
            context: ctx.metadata.clone(),
            hints: self.hints_for(ctx).await,
            mission_type: ctx.mission_type.clone(),
        };
        Ok(self.builder.build(&request, ctx.force_failure).await?)
    }

    /// Run a plan through the pool.
    pub async fn execute(&self, plan: &MissionPlan, _ctx: &MissionContext) -> MissionResult {
        let execution = self.pool.execute(plan, Arc::clone(&self.executor)).await;
        MissionResult::from_pool(plan, execution)
    }

    /// Verify a mission result against its plan.
    pub async fn verify(
        &self,
        plan: &MissionPlan,
        result: &MissionResult,
    ) -> Result<VerificationReport, OverseerError> {
        Ok(self.verifier.verify(plan, &result.execution).await?)
    }

    /// Drive a mission to a terminal state.
    ///
    /// Low quality is never an error: once retries run out the result comes
    /// back with `escalation` set. Errors are reserved for collaborator
    /// failures, which leave the mission in the `Failed` state.
    pub async fn run(&self, ctx: MissionContext) -> Result<MissionResult, OverseerError> {
        let span = info_span!("mission", mission = %ctx.mission_id);
        self.run_inner(ctx).instrument(span).await
    }

    async fn run_inner(&self, ctx: MissionContext) -> Result<MissionResult, OverseerError> {
        let started = Instant::now();
        let mut tracker = Tracker {
            mission_id: ctx.mission_id,
            state: MissionState::Planning,
            attempt: 1,
            events: self.events.clone(),
        };

        let task_id = self.intake(&ctx).await?;

        let plan = match self.plan(&ctx).await {
            Ok(plan) => plan,
            Err(e) => return Err(self.abort(&mut tracker, task_id.as_ref(), e).await),
        };

        tracker.advance(MissionState::Executing).await?;
        let mut result = self.execute(&plan, &ctx).await;
        let mut retries_used = 0u32;

        loop {
            tracker.advance(MissionState::Verifying).await?;
            let report = match self.verify(&plan, &result).await {
                Ok(report) => report,
                Err(e) => return Err(self.abort(&mut tracker, task_id.as_ref(), e).await),
            };
            result.apply_report(&report);

            debug!(
                attempt = tracker.attempt,
                quality = report.quality_score,
                passed = report.passed,
                "attempt verified"
            );

            // Failed checks lower the score; the threshold alone decides.
            if self.retry.is_acceptable(report.quality_score) {
                tracker.advance(MissionState::Completed).await?;
                break;
            }

            if !self.retry.has_budget(retries_used) {
                tracker.advance(MissionState::Escalated).await?;
                result.escalation = Some(Escalation {
                    required: true,
                    reason: escalation_reason(&report, tracker.attempt, self.retry.quality_threshold),
                });
                break;
            }

            tracker.advance(MissionState::Retrying).await?;
            retries_used += 1;
            tracker.attempt += 1;
            if !self.retry.delay.is_zero() {
                tokio::time::sleep(self.retry.delay).await;
            }

            let next = retry_plan(&plan, &result.execution, &report, tracker.attempt);
            info!(
                attempt = tracker.attempt,
                steps = next.len(),
                "retrying mission"
            );

            tracker.advance(MissionState::Executing).await?;
            let latest = self.pool.execute(&next, Arc::clone(&self.executor)).await;
            result.cost += if plan.is_empty() {
                plan.estimated_cost
            } else {
                plan.estimated_cost * next.len() as f64 / plan.len() as f64
            };
            let merged = merge_executions(&plan, &result.execution, latest);
            result.replace_execution(merged);
        }

        result.state = tracker.state;
        result.success = tracker.state == MissionState::Completed;
        result.attempts = tracker.attempt;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.task_id = task_id.clone();

        self.settle(&result, &plan).await?;

        info!(
            state = %result.state,
            attempts = result.attempts,
            quality = result.quality_score.unwrap_or_default(),
            confidence = result.confidence,
            "mission finished"
        );
        Ok(result)
    }

    async fn hints_for(&self, ctx: &MissionContext) -> Vec<PatternHint> {
        let (Some(patterns), Some(mission_type)) = (&self.patterns, &ctx.mission_type) else {
            return Vec::new();
        };
        match patterns.history(mission_type, HINT_HISTORY_LIMIT).await {
            Ok(records) => PatternHint::summarize(mission_type, &records)
                .into_iter()
                .collect(),
            Err(e) => {
                warn!(mission_type = %mission_type, error = %e, "pattern history unavailable");
                Vec::new()
            }
        }
    }

    /// Record the mission as a claimed task.
    async fn intake(&self, ctx: &MissionContext) -> Result<Option<TaskId>, OverseerError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let mut input = NewTask::new(mission_title(&ctx.mission))
            .with_description(ctx.mission.clone())
            .with_tag("mission")
            .with_assignee("overseer");
        if let Some(mission_type) = &ctx.mission_type {
            input = input.with_tag(mission_type.clone());
        }

        let task = store.create(input).await?;
        store
            .update(&task.id, TaskPatch::status(TaskStatus::InProgress))
            .await?;
        debug!(task_id = %task.id, "mission task claimed");
        Ok(Some(task.id))
    }

    /// Persist the terminal state and kick off the learning write.
    async fn settle(&self, result: &MissionResult, plan: &MissionPlan) -> Result<(), OverseerError> {
        if let (Some(store), Some(task_id)) = (&self.store, &result.task_id) {
            match result.state {
                MissionState::Completed => {
                    store.complete(task_id).await?;
                }
                MissionState::Escalated => {
                    self.release_task(store, task_id, ESCALATED_TAG).await?;
                }
                _ => {}
            }
        }

        if result.state == MissionState::Completed {
            if let Some(patterns) = &self.patterns {
                let record = LearningRecord {
                    mission_type: plan.mission_type.clone(),
                    agents_used: plan.tools().into_iter().collect(),
                    outcome: LearningOutcome::Completed,
                    quality_score: result.quality_score.unwrap_or_default(),
                    attempts: result.attempts,
                    recorded_at: chrono::Utc::now(),
                };
                let patterns = Arc::clone(patterns);
                self.learning.spawn(
                    async move {
                        if let Err(e) = patterns.record(record).await {
                            warn!(error = %e, "failed to record learning history");
                        }
                    }
                    .in_current_span(),
                );
            }
        }
        Ok(())
    }

    /// Drop the claim on a task and tag it.
    async fn release_task(
        &self,
        store: &TaskStore,
        task_id: &TaskId,
        tag: &str,
    ) -> Result<(), StoreError> {
        let mut tags = store
            .get(task_id)
            .await
            .map(|t| t.tags)
            .unwrap_or_default();
        tags.insert(tag.to_string());
        store
            .update(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Pending),
                    tags: Some(tags),
                    ..TaskPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Move to `Failed`, release the mission task, and hand back the error.
    async fn abort(
        &self,
        tracker: &mut Tracker,
        task_id: Option<&TaskId>,
        error: impl Into<OverseerError>,
    ) -> OverseerError {
        let error = error.into();
        warn!(state = %tracker.state, error = %error, "mission aborted");

        if let Err(e) = tracker.advance(MissionState::Failed).await {
            return e.into();
        }
        if let (Some(store), Some(task_id)) = (&self.store, task_id) {
            if let Err(e) = self.release_task(store, task_id, "failed").await {
                warn!(task_id = %task_id, error = %e, "could not release mission task");
            }
        }
        error
    }
}

/// Current state plus transition bookkeeping for one run.
struct Tracker {
    mission_id: MissionId,
    state: MissionState,
    attempt: u32,
    events: Option<Arc<EventBus>>,
}

impl Tracker {
    async fn advance(&mut self, to: MissionState) -> Result<(), InvalidTransition> {
        let from = self.state.transition(to)?;
        debug!(from = %from, to = %to, attempt = self.attempt, "mission transition");
        if let Some(bus) = &self.events {
            bus.emit(Event::mission_transition(self.mission_id, from, to, self.attempt))
                .await;
        }
        Ok(())
    }
}

fn escalation_reason(report: &VerificationReport, attempts: u32, threshold: f64) -> String {
    let mut reason = format!(
        "quality {:.1} below threshold {:.1} after {} attempt(s)",
        report.quality_score, threshold, attempts
    );
    let failed: Vec<&str> = report
        .failed_checks()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    if !failed.is_empty() {
        reason.push_str(&format!("; failing checks: {}", failed.join(", ")));
    }
    reason
}

fn mission_title(mission: &str) -> String {
    const MAX: usize = 80;
    let first_line = mission.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return "mission".to_string();
    }
    if first_line.chars().count() <= MAX {
        return first_line.to_string();
    }
    let mut title: String = first_line.chars().take(MAX - 3).collect();
    title.push_str("...");
    title
}
