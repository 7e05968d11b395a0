//! Bounded-concurrency plan execution.
//!
//! The pool dispatches a step as soon as every dependency has completed and a
//! worker slot is free; there is no wave barrier. A failing step cancels its
//! transitive dependents. Cancelling the pool stops further dispatch while
//! steps already in flight run to completion or to their own deadline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::plan::{MissionPlan, Step};
use crate::core::types::{MissionId, StepId};
use crate::events::{Event, EventBus};

use super::executor::{CancelReason, StepError, StepExecutor, execute_with_deadline};

/// Default number of concurrently running steps.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default per-step deadline.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Execution pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    /// Deadline for steps that do not set their own.
    pub step_timeout_ms: u64,
}

impl PoolConfig {
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
        }
    }
}

/// Terminal status of a step within one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    pub duration_ms: u64,
    /// Offset from plan dispatch at which the step started. `None` if it
    /// never ran.
    pub start_offset_ms: Option<u64>,
    pub finish_offset_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// Aggregated outcome of a pool run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolResult {
    pub mission_id: MissionId,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    /// Observed wall-clock time.
    pub total_duration_ms: u64,
    /// Longest dependency chain by summed step durations.
    pub critical_path_ms: u64,
    /// Per-step results in plan order.
    pub results: Vec<StepResult>,
    /// Whether the pool-wide cancellation signal fired during the run.
    pub cancelled: bool,
}

impl PoolResult {
    /// Every step completed.
    pub fn success(&self) -> bool {
        self.failed_count == 0 && self.cancelled_count == 0
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn get(&self, step_id: &StepId) -> Option<&StepResult> {
        self.results.iter().find(|r| &r.step_id == step_id)
    }

    /// Steps that did not complete.
    pub fn unfinished(&self) -> HashSet<StepId> {
        self.results
            .iter()
            .filter(|r| r.status != StepStatus::Completed)
            .map(|r| r.step_id.clone())
            .collect()
    }

    /// Outputs of completed steps keyed by step id.
    pub fn outputs(&self) -> Map<String, Value> {
        self.results
            .iter()
            .filter_map(|r| {
                r.output
                    .as_ref()
                    .map(|o| (r.step_id.as_str().to_string(), o.clone()))
            })
            .collect()
    }

    /// The first failure, if any.
    pub fn first_error(&self) -> Option<&StepError> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .find_map(|r| r.error.as_ref())
    }
}

/// Bounded-concurrency scheduler for mission plans. Re-invokable: each call
/// to [`execute`](Self::execute) is an independent run.
pub struct ExecutionPool {
    config: PoolConfig,
    shutdown: CancellationToken,
    event_bus: Option<Arc<EventBus>>,
}

impl ExecutionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            event_bus: None,
        }
    }

    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self::new(PoolConfig::with_concurrency(max_concurrency))
    }

    /// Emit step lifecycle events on the given bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Cancel every current and future run of this pool.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Execute a plan. Runs stop dispatching if the pool is cancelled.
    pub async fn execute(
        &self,
        plan: &MissionPlan,
        executor: Arc<dyn StepExecutor>,
    ) -> PoolResult {
        self.execute_with_cancel(plan, executor, self.shutdown.child_token())
            .await
    }

    /// Execute a plan under a caller-supplied cancellation token.
    pub async fn execute_with_cancel(
        &self,
        plan: &MissionPlan,
        executor: Arc<dyn StepExecutor>,
        cancel: CancellationToken,
    ) -> PoolResult {
        let span = info_span!(
            "pool_execution",
            mission = %plan.mission_id,
            steps = plan.len(),
            concurrency = self.config.max_concurrency,
        );
        self.run(plan, executor, cancel).instrument(span).await
    }

    async fn run(
        &self,
        plan: &MissionPlan,
        executor: Arc<dyn StepExecutor>,
        cancel: CancellationToken,
    ) -> PoolResult {
        let mission_id = plan.mission_id;
        let origin = Instant::now();
        let max_concurrency = self.config.max_concurrency.max(1);

        let mut run = RunState::new(plan);
        let mut join_set: JoinSet<Finished> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, StepId> = HashMap::new();
        let mut pool_cancelled = false;

        debug!(ready = run.ready.len(), "starting pool run");

        loop {
            if !pool_cancelled && cancel.is_cancelled() {
                pool_cancelled = true;
                let skipped = run.cancel_all_pending(CancelReason::PoolCancelled);
                debug!(skipped = skipped.len(), "pool cancelled, dispatch halted");
                self.emit_cancelled(mission_id, &skipped, &CancelReason::PoolCancelled)
                    .await;
            }

            while !pool_cancelled && running.len() < max_concurrency {
                let Some(step_id) = run.ready.pop_front() else {
                    break;
                };
                let Some(step) = plan.step(&step_id).cloned() else {
                    continue;
                };
                run.outcomes.insert(step_id.clone(), Outcome::Running);

                let deadline = step
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.step_timeout());
                let task_span = info_span!("step", step = %step_id, tool = %step.tool);
                let handle = join_set.spawn(
                    run_step(
                        step,
                        Arc::clone(&executor),
                        deadline,
                        origin,
                        mission_id,
                        self.event_bus.clone(),
                    )
                    .instrument(task_span),
                );
                running.insert(handle.id(), step_id);
            }

            if join_set.is_empty() {
                let stranded = run.cancel_all_pending(CancelReason::Unschedulable);
                if !stranded.is_empty() {
                    warn!(steps = stranded.len(), "steps with unsatisfiable dependencies");
                    self.emit_cancelled(mission_id, &stranded, &CancelReason::Unschedulable)
                        .await;
                }
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !pool_cancelled => {
                    continue;
                }
                joined = join_set.join_next_with_id() => {
                    let finished = match joined {
                        Some(Ok((task_id, finished))) => {
                            running.remove(&task_id);
                            finished
                        }
                        Some(Err(join_err)) => {
                            let Some(step_id) = running.remove(&join_err.id()) else {
                                continue;
                            };
                            let now = origin.elapsed();
                            Finished {
                                step_id,
                                result: Err(StepError::failed(format!(
                                    "step task aborted: {}",
                                    join_err
                                ))),
                                started: now,
                                finished: now,
                            }
                        }
                        None => continue,
                    };
                    self.settle(&mut run, mission_id, finished).await;
                }
            }
        }

        let total = origin.elapsed();
        let result = run.into_result(plan, total, pool_cancelled);

        debug!(
            completed = result.completed_count,
            failed = result.failed_count,
            cancelled = result.cancelled_count,
            total_ms = result.total_duration_ms,
            critical_path_ms = result.critical_path_ms,
            "pool run finished"
        );
        result
    }

    /// Record a finished step and update eligibility of its dependents.
    async fn settle(&self, run: &mut RunState, mission_id: MissionId, finished: Finished) {
        let duration = finished.finished.saturating_sub(finished.started);
        let step_id = finished.step_id.clone();

        match finished.result {
            Ok(output) => {
                run.record(
                    &step_id,
                    Outcome::Completed(output),
                    finished.started,
                    finished.finished,
                );
                self.emit(Event::step_completed(mission_id, step_id.clone(), duration))
                    .await;
                run.release_dependents(&step_id);
            }
            Err(error) => {
                let timed_out = error.is_timeout();
                warn!(step = %step_id, error = %error, "step failed");
                self.emit(Event::step_failed(
                    mission_id,
                    step_id.clone(),
                    error.to_string(),
                    timed_out,
                ))
                .await;
                run.record(
                    &step_id,
                    Outcome::Failed(error),
                    finished.started,
                    finished.finished,
                );

                let reason = CancelReason::UpstreamFailed(step_id.clone());
                let cancelled = run.cancel_downstream(&step_id, &reason);
                if !cancelled.is_empty() {
                    debug!(step = %step_id, cancelled = cancelled.len(), "cancelled dependents");
                }
                self.emit_cancelled(mission_id, &cancelled, &reason).await;
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }

    async fn emit_cancelled(&self, mission_id: MissionId, ids: &[StepId], reason: &CancelReason) {
        if let Some(bus) = &self.event_bus {
            for id in ids {
                bus.emit(Event::step_cancelled(
                    mission_id,
                    id.clone(),
                    reason.to_string(),
                ))
                .await;
            }
        }
    }
}

impl Default for ExecutionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// What a worker hands back to the scheduler.
struct Finished {
    step_id: StepId,
    result: Result<Value, StepError>,
    started: Duration,
    finished: Duration,
}

async fn run_step(
    step: Step,
    executor: Arc<dyn StepExecutor>,
    deadline: Duration,
    origin: Instant,
    mission_id: MissionId,
    event_bus: Option<Arc<EventBus>>,
) -> Finished {
    if let Some(bus) = &event_bus {
        bus.emit(Event::step_started(mission_id, step.id.clone()))
            .await;
    }

    let started = origin.elapsed();
    let result = execute_with_deadline(executor.as_ref(), &step, deadline).await;
    let finished = origin.elapsed();

    Finished {
        step_id: step.id,
        result,
        started,
        finished,
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    Running,
    Completed(Value),
    Failed(StepError),
    Cancelled(CancelReason),
}

impl Outcome {
    fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

/// Scheduler bookkeeping for one run.
struct RunState {
    outcomes: HashMap<StepId, Outcome>,
    timings: HashMap<StepId, (Duration, Duration)>,
    /// Dependencies not yet completed, per step.
    waiting_on: HashMap<StepId, usize>,
    dependents: HashMap<StepId, Vec<StepId>>,
    ready: VecDeque<StepId>,
}

impl RunState {
    fn new(plan: &MissionPlan) -> Self {
        let mut outcomes = HashMap::new();
        let mut waiting_on = HashMap::new();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut ready = VecDeque::new();

        for step in &plan.steps {
            outcomes.insert(step.id.clone(), Outcome::Pending);
            waiting_on.insert(step.id.clone(), step.depends_on.len());
            for dep in &step.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.id.clone());
            }
            if step.depends_on.is_empty() {
                ready.push_back(step.id.clone());
            }
        }

        Self {
            outcomes,
            timings: HashMap::new(),
            waiting_on,
            dependents,
            ready,
        }
    }

    fn record(&mut self, id: &StepId, outcome: Outcome, started: Duration, finished: Duration) {
        self.outcomes.insert(id.clone(), outcome);
        self.timings.insert(id.clone(), (started, finished));
    }

    fn release_dependents(&mut self, id: &StepId) {
        let Some(children) = self.dependents.get(id) else {
            return;
        };
        for child in children {
            let Some(count) = self.waiting_on.get_mut(child) else {
                continue;
            };
            *count = count.saturating_sub(1);
            let pending = self.outcomes.get(child).is_some_and(Outcome::is_pending);
            if *count == 0 && pending {
                self.ready.push_back(child.clone());
            }
        }
    }

    /// Cancel every pending transitive dependent of `id`.
    fn cancel_downstream(&mut self, id: &StepId, reason: &CancelReason) -> Vec<StepId> {
        let mut cancelled = Vec::new();
        let mut queue: VecDeque<StepId> = self
            .dependents
            .get(id)
            .cloned()
            .unwrap_or_default()
            .into();
        let mut seen = HashSet::new();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if self.outcomes.get(&next).is_some_and(Outcome::is_pending) {
                self.outcomes
                    .insert(next.clone(), Outcome::Cancelled(reason.clone()));
                cancelled.push(next.clone());
            }
            if let Some(children) = self.dependents.get(&next) {
                queue.extend(children.iter().cloned());
            }
        }

        self.ready.retain(|r| !cancelled.contains(r));
        cancelled
    }

    /// Cancel everything that has not started.
    fn cancel_all_pending(&mut self, reason: CancelReason) -> Vec<StepId> {
        let mut cancelled: Vec<StepId> = self
            .outcomes
            .iter()
            .filter(|(_, o)| o.is_pending())
            .map(|(id, _)| id.clone())
            .collect();
        cancelled.sort();
        for id in &cancelled {
            self.outcomes
                .insert(id.clone(), Outcome::Cancelled(reason.clone()));
        }
        self.ready.clear();
        cancelled
    }

    fn into_result(mut self, plan: &MissionPlan, total: Duration, cancelled: bool) -> PoolResult {
        let critical_path = critical_path(plan, &self.timings);

        let mut completed_count = 0;
        let mut failed_count = 0;
        let mut cancelled_count = 0;
        let mut results = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            let outcome = self
                .outcomes
                .remove(&step.id)
                .unwrap_or(Outcome::Cancelled(CancelReason::Unschedulable));
            let timing = self.timings.get(&step.id).copied();
            let (status, output, error) = match outcome {
                Outcome::Completed(value) => {
                    completed_count += 1;
                    (StepStatus::Completed, Some(value), None)
                }
                Outcome::Failed(e) => {
                    failed_count += 1;
                    (StepStatus::Failed, None, Some(e))
                }
                Outcome::Cancelled(reason) => {
                    cancelled_count += 1;
                    (
                        StepStatus::Cancelled,
                        None,
                        Some(StepError::Cancelled { reason }),
                    )
                }
                Outcome::Pending | Outcome::Running => {
                    cancelled_count += 1;
                    (
                        StepStatus::Cancelled,
                        None,
                        Some(StepError::Cancelled {
                            reason: CancelReason::Unschedulable,
                        }),
                    )
                }
            };

            results.push(StepResult {
                step_id: step.id.clone(),
                status,
                duration_ms: timing.map_or(0, |(s, f)| as_ms(f.saturating_sub(s))),
                start_offset_ms: timing.map(|(s, _)| as_ms(s)),
                finish_offset_ms: timing.map(|(_, f)| as_ms(f)),
                output,
                error,
            });
        }

        PoolResult {
            mission_id: plan.mission_id,
            completed_count,
            failed_count,
            cancelled_count,
            total_duration_ms: as_ms(total),
            critical_path_ms: as_ms(critical_path),
            results,
            cancelled,
        }
    }
}

/// Longest chain of summed step durations through the dependency graph.
/// Steps that never ran contribute zero.
fn critical_path(plan: &MissionPlan, timings: &HashMap<StepId, (Duration, Duration)>) -> Duration {
    let duration_of = |id: &StepId| {
        timings
            .get(id)
            .map_or(Duration::ZERO, |(s, f)| f.saturating_sub(*s))
    };

    let Ok(order) = plan.validate() else {
        return plan
            .steps
            .iter()
            .map(|s| duration_of(&s.id))
            .max()
            .unwrap_or_default();
    };

    let mut longest: HashMap<StepId, Duration> = HashMap::new();
    for id in order {
        let upstream = plan
            .step(&id)
            .map(|s| {
                s.depends_on
                    .iter()
                    .filter_map(|d| longest.get(d).copied())
                    .max()
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        let own = duration_of(&id);
        longest.insert(id, upstream + own);
    }

    longest.into_values().max().unwrap_or_default()
}

fn as_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}
