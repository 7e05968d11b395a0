//! Mission overseer integration tests.
//!
//! Full plan, execute, verify loops with the task store, pattern store and
//! event bus attached.

use async_trait::async_trait;
use overseer::mission::ESCALATED_TAG;
use overseer::testing::{
    FailingPatternStore, FailingPlanner, FailingVerifier, FixedVerifier, FlakyTool, StaticPlanner,
};
use overseer::{
    CheckVerifier, Event, EventBus, EventHandler, MemoryPatternStore, MissionContext,
    MissionState, Overseer, OverseerError, PlanBuilder, Planner, RetryPolicy, Step, TaskStatus,
    TaskStore, ToolRegistry, Verifier,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::common::wait_for_records;

/// Recording event handler for verifying mission transitions.
struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    async fn transitions(&self) -> Vec<(MissionState, MissionState)> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::MissionTransition { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

fn report_steps() -> Vec<Step> {
    vec![
        Step::new("fetch", "fetch data", "echo").with_payload(json!({ "artifact": "data.csv" })),
        Step::new("render", "render report", "echo")
            .with_payload(json!({ "format": "pdf" }))
            .depends_on(["fetch"]),
    ]
}

fn overseer(planner: Arc<dyn Planner>, verifier: Arc<dyn Verifier>) -> Overseer {
    let builder = PlanBuilder::new(planner, Arc::new(ToolRegistry::with_builtins()));
    Overseer::new(builder, verifier)
}

/// Test: a clean mission completes, closes its task and records learning.
#[tokio::test]
async fn test_mission_completes_and_learns() {
    let store = Arc::new(TaskStore::in_memory());
    let patterns = Arc::new(MemoryPatternStore::new());
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps("report", report_steps())),
        Arc::new(CheckVerifier::new()),
    )
    .with_task_store(store.clone())
    .with_pattern_store(patterns.clone());

    let result = overseer
        .run(MissionContext::new("build the weekly report").with_mission_type("report"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.state, MissionState::Completed);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.quality_score, Some(100.0));
    assert_eq!(result.confidence, 1.0);
    assert!(result.escalation.is_none());
    assert!(result.artifacts.contains(&"data.csv".to_string()));

    let task = store.get(result.task_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.tags.contains("mission"));
    assert!(task.tags.contains("report"));

    let records = wait_for_records(&patterns, 1, Duration::from_secs(2)).await;
    assert_eq!(records[0].mission_type, "report");
    assert_eq!(records[0].attempts, 1);
    assert_eq!(records[0].agents_used, vec!["echo".to_string()]);
}

/// Test: verification that never passes escalates after exactly two retries.
#[tokio::test]
async fn test_always_failing_verification_escalates() {
    let store = Arc::new(TaskStore::in_memory());
    let patterns = Arc::new(MemoryPatternStore::new());
    let verifier = Arc::new(FixedVerifier::failing(40.0));
    let events = Arc::new(EventBus::new());
    let recorder = RecordingHandler::new();
    events.register(recorder.clone()).await;

    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps("report", report_steps())),
        verifier.clone(),
    )
    .with_retry_policy(RetryPolicy::default())
    .with_task_store(store.clone())
    .with_pattern_store(patterns.clone())
    .with_event_bus(events);

    let result = overseer
        .run(MissionContext::new("doomed").with_mission_type("report"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.state, MissionState::Escalated);
    assert_eq!(result.attempts, 3);
    assert_eq!(verifier.calls(), 3);
    let escalation = result.escalation.as_ref().unwrap();
    assert!(escalation.required);
    assert!(escalation.reason.contains("after 3 attempt(s)"));

    use MissionState::*;
    assert_eq!(
        recorder.transitions().await,
        vec![
            (Planning, Executing),
            (Executing, Verifying),
            (Verifying, Retrying),
            (Retrying, Executing),
            (Executing, Verifying),
            (Verifying, Retrying),
            (Retrying, Executing),
            (Executing, Verifying),
            (Verifying, Escalated),
        ]
    );

    let task = store.get(result.task_id.as_ref().unwrap()).await.unwrap();
    assert!(task.tags.contains(ESCALATED_TAG));
    assert_ne!(task.status, TaskStatus::InProgress);
    assert_ne!(task.status, TaskStatus::Completed);

    // Escalations are not learned from.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(patterns.records().is_empty());
}

/// Test: a score at or above the threshold completes even with a failed check.
#[tokio::test]
async fn test_quality_above_threshold_completes_despite_failed_check() {
    let verifier = Arc::new(FixedVerifier::failing(90.0));
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps("report", report_steps())),
        verifier.clone(),
    );

    let result = overseer.run(MissionContext::new("good enough")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.state, MissionState::Completed);
    assert_eq!(result.attempts, 1);
    assert_eq!(verifier.calls(), 1);
    assert_eq!(result.quality_score, Some(90.0));
    assert!(result.escalation.is_none());
    // The failed check still shows up as an uncertainty.
    assert!(result.uncertainties.iter().any(|u| u.starts_with("fixed:")));
}

/// Test: one null output among completed steps scores 90 and completes first time.
#[tokio::test]
async fn test_null_output_step_completes_without_retry() {
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps(
            "ping",
            vec![
                Step::new("ping", "ping", "echo"),
                Step::new("pong", "pong", "echo").with_payload(json!({ "artifact": "pong.txt" })),
            ],
        )),
        Arc::new(CheckVerifier::new()),
    );

    let result = overseer.run(MissionContext::new("ping")).await.unwrap();

    assert_eq!(result.state, MissionState::Completed);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.quality_score, Some(90.0));
    assert!(
        result
            .uncertainties
            .iter()
            .any(|u| u.starts_with("outputs_present:"))
    );
}

/// Test: an unreachable pattern store neither blocks planning nor fails the mission.
#[tokio::test]
async fn test_pattern_store_outage_does_not_fail_mission() {
    let store = Arc::new(TaskStore::in_memory());
    let planner = Arc::new(StaticPlanner::from_steps("report", report_steps()));
    let overseer = overseer(planner.clone(), Arc::new(CheckVerifier::new()))
        .with_task_store(store.clone())
        .with_pattern_store(Arc::new(FailingPatternStore));

    let result = overseer
        .run(MissionContext::new("weekly report").with_mission_type("report"))
        .await
        .unwrap();
    overseer.flush_learning().await;

    assert!(result.success);
    assert_eq!(result.state, MissionState::Completed);
    assert_eq!(result.attempts, 1);

    let requests = planner.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].hints.is_empty());

    let task = store.get(result.task_id.as_ref().unwrap()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

/// Test: flushing waits for the learning write, so records are visible at once.
#[tokio::test]
async fn test_flush_learning_persists_record() {
    let patterns = Arc::new(MemoryPatternStore::new());
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps("report", report_steps())),
        Arc::new(CheckVerifier::new()),
    )
    .with_pattern_store(patterns.clone());

    for mission in ["first", "second"] {
        overseer
            .run(MissionContext::new(mission).with_mission_type("report"))
            .await
            .unwrap();
        overseer.flush_learning().await;
    }

    let records = patterns.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.mission_type == "report"));
}

/// Test: forced failure drives the structural verifier to escalation.
#[tokio::test]
async fn test_forced_failure_escalates() {
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps("report", report_steps())),
        Arc::new(CheckVerifier::new()),
    )
    .with_retry_policy(RetryPolicy::new(1, 85.0));

    let result = overseer
        .run(MissionContext::new("forced").with_forced_failure())
        .await
        .unwrap();

    assert_eq!(result.state, MissionState::Escalated);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.quality_score, Some(0.0));
}

/// Test: a retry re-runs only the steps that did not complete.
#[tokio::test]
async fn test_retry_reruns_only_unfinished_steps() {
    let flaky = Arc::new(FlakyTool::new(1));
    let steady = Arc::new(FlakyTool::new(0));
    let registry = ToolRegistry::with_builtins()
        .with_tool("flaky", flaky.clone())
        .with_tool("steady", steady.clone());

    let planner = StaticPlanner::from_steps(
        "mixed",
        vec![
            Step::new("stable", "stable work", "steady"),
            Step::new("unstable", "unstable work", "flaky"),
        ],
    );
    let builder = PlanBuilder::new(Arc::new(planner), Arc::new(registry));
    let overseer = Overseer::new(builder, Arc::new(CheckVerifier::new()));

    let result = overseer.run(MissionContext::new("retry me")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.attempts, 2);
    assert_eq!(flaky.call_count().await, 2);
    assert_eq!(steady.call_count().await, 1);
    assert_eq!(result.execution.completed_count, 2);
    assert_eq!(result.execution.failed_count, 0);
}

/// Test: a second mission of the same type is planned with hints.
#[tokio::test]
async fn test_history_feeds_planner_hints() {
    let patterns = Arc::new(MemoryPatternStore::new());
    let planner = Arc::new(StaticPlanner::from_steps("report", report_steps()));
    let overseer = overseer(planner.clone(), Arc::new(CheckVerifier::new()))
        .with_pattern_store(patterns.clone());

    overseer
        .run(MissionContext::new("first").with_mission_type("report"))
        .await
        .unwrap();
    wait_for_records(&patterns, 1, Duration::from_secs(2)).await;

    overseer
        .run(MissionContext::new("second").with_mission_type("report"))
        .await
        .unwrap();

    let requests = planner.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[0].hints.is_empty());
    assert_eq!(requests[1].hints.len(), 1);
    assert_eq!(requests[1].hints[0].samples, 1);
    assert_eq!(requests[1].hints[0].success_rate, 1.0);
}

/// Test: planner failure surfaces as a planning error and fails the task.
#[tokio::test]
async fn test_planner_failure_is_planning_error() {
    let store = Arc::new(TaskStore::in_memory());
    let overseer = overseer(
        Arc::new(FailingPlanner::new("model offline")),
        Arc::new(CheckVerifier::new()),
    )
    .with_task_store(store.clone());

    let result = overseer.run(MissionContext::new("anything")).await;
    assert!(matches!(result, Err(OverseerError::Planning(_))));

    let tasks = store.get_all().await;
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].tags.contains("failed"));
    assert_ne!(tasks[0].status, TaskStatus::InProgress);
}

/// Test: verifier failure surfaces as a verification error.
#[tokio::test]
async fn test_verifier_failure_is_verification_error() {
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps("report", report_steps())),
        Arc::new(FailingVerifier::new("checker crashed")),
    );

    let result = overseer.run(MissionContext::new("anything")).await;
    assert!(matches!(result, Err(OverseerError::Verification(_))));
}

/// Test: a plan with an unknown tool never executes.
#[tokio::test]
async fn test_unknown_tool_rejected_before_execution() {
    let overseer = overseer(
        Arc::new(StaticPlanner::from_steps(
            "report",
            vec![Step::new("x", "x", "teleport")],
        )),
        Arc::new(CheckVerifier::new()),
    );

    let result = overseer.run(MissionContext::new("anything")).await;
    assert!(matches!(result, Err(OverseerError::Planning(_))));
}
