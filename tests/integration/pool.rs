//! Execution pool integration tests.
//!
//! Ordering, parallelism and critical-path properties over real timing.

use overseer::testing::ScriptedExecutor;
use overseer::{CancelReason, ExecutionPool, PoolConfig, Step, StepError, StepId, StepStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::plan;

/// Test: across 100 random DAGs no step starts before its dependencies finish.
#[tokio::test]
async fn test_randomized_dependency_ordering() {
    for seed in 0..100u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = rng.gen_range(2..=10);

        let mut steps = Vec::with_capacity(count);
        let mut exec = ScriptedExecutor::new();
        for i in 0..count {
            let id = format!("s{}", i);
            let deps: Vec<String> = (0..i)
                .filter(|_| rng.gen_bool(0.35))
                .map(|j| format!("s{}", j))
                .collect();
            steps.push(Step::new(id.as_str(), "work", "echo").depends_on(deps));
            exec = exec.delay(id.as_str(), Duration::from_millis(rng.gen_range(0..4)));
        }

        let plan = plan(steps);
        let exec = Arc::new(exec);
        let pool = ExecutionPool::with_concurrency(rng.gen_range(1..=4));
        let result = pool.execute(&plan, exec.clone()).await;

        assert_eq!(result.completed_count, count, "seed {}", seed);

        let spans = exec.spans().await;
        for step in &plan.steps {
            let own = spans[&step.id];
            let started_at = result.get(&step.id).unwrap().start_offset_ms.unwrap();
            for dep in &step.depends_on {
                let upstream = spans[dep];
                assert!(
                    own.started >= upstream.finished,
                    "seed {}: step {} started before {} finished",
                    seed,
                    step.id,
                    dep
                );

                let dep_finished_at = result.get(dep).unwrap().finish_offset_ms.unwrap();
                assert!(
                    started_at >= dep_finished_at,
                    "seed {}: recorded start of {} ({}ms) precedes finish of {} ({}ms)",
                    seed,
                    step.id,
                    started_at,
                    dep,
                    dep_finished_at
                );
            }
        }
    }
}

/// Test: independent steps run in parallel; wall clock tracks the longest one.
#[tokio::test]
async fn test_parallel_wall_clock_near_max() {
    let exec = Arc::new(
        ScriptedExecutor::new()
            .delay("a", Duration::from_millis(100))
            .delay("b", Duration::from_millis(150))
            .delay("c", Duration::from_millis(200)),
    );
    let plan = plan(vec![
        Step::new("a", "a", "echo"),
        Step::new("b", "b", "echo"),
        Step::new("c", "c", "echo"),
    ]);

    let result = ExecutionPool::with_concurrency(4)
        .execute(&plan, exec.clone())
        .await;

    assert!(result.success());
    assert!(result.total_duration_ms >= 200);
    assert!(
        result.total_duration_ms < 350,
        "took {}ms, expected close to 200ms",
        result.total_duration_ms
    );
    assert!(result.critical_path_ms >= 200);
    assert!(result.critical_path_ms <= result.total_duration_ms);
    assert_eq!(exec.peak_concurrency(), 3);
}

/// Test: a serial chain's critical path equals its wall clock at any concurrency.
#[tokio::test]
async fn test_serial_chain_critical_path_matches_total() {
    for concurrency in [1, 4] {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .delay("a", Duration::from_millis(50))
                .delay("b", Duration::from_millis(50))
                .delay("c", Duration::from_millis(50)),
        );
        let plan = plan(vec![
            Step::new("a", "a", "echo"),
            Step::new("b", "b", "echo").depends_on(["a"]),
            Step::new("c", "c", "echo").depends_on(["b"]),
        ]);

        let result = ExecutionPool::with_concurrency(concurrency)
            .execute(&plan, exec.clone())
            .await;

        assert!(result.success());
        assert_eq!(exec.peak_concurrency(), 1);
        assert!(result.critical_path_ms >= 150);
        assert!(result.critical_path_ms <= result.total_duration_ms);
        assert!(
            result.total_duration_ms - result.critical_path_ms < 50,
            "concurrency {}: critical path {}ms vs total {}ms",
            concurrency,
            result.critical_path_ms,
            result.total_duration_ms
        );
    }
}

/// Test: with one slot, independent steps serialize but the critical path is
/// still the longest single step.
#[tokio::test]
async fn test_single_slot_critical_path_tracks_longest_step() {
    let exec = Arc::new(
        ScriptedExecutor::new()
            .delay("a", Duration::from_millis(40))
            .delay("b", Duration::from_millis(80)),
    );
    let plan = plan(vec![Step::new("a", "a", "echo"), Step::new("b", "b", "echo")]);

    let result = ExecutionPool::with_concurrency(1)
        .execute(&plan, exec.clone())
        .await;

    assert!(result.success());
    assert_eq!(exec.peak_concurrency(), 1);
    assert!(result.total_duration_ms >= 120);
    assert!(result.critical_path_ms >= 80);
    assert!(
        result.critical_path_ms < 120,
        "critical path {}ms should not include the other step",
        result.critical_path_ms
    );
}

/// Test: a failure cancels its dependents but not unrelated branches.
#[tokio::test]
async fn test_failure_cascades_only_downstream() {
    let exec = Arc::new(ScriptedExecutor::new().fail("fetch", "connection reset"));
    let plan = plan(vec![
        Step::new("fetch", "fetch", "echo"),
        Step::new("parse", "parse", "echo").depends_on(["fetch"]),
        Step::new("report", "report", "echo").depends_on(["parse"]),
        Step::new("audit", "audit", "echo"),
    ]);

    let result = ExecutionPool::with_concurrency(2)
        .execute(&plan, exec.clone())
        .await;

    assert_eq!(result.completed_count, 1);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.cancelled_count, 2);
    assert!(!result.success());

    let report = result.get(&StepId::new("report")).unwrap();
    assert_eq!(report.status, StepStatus::Cancelled);
    assert_eq!(
        report.error,
        Some(StepError::Cancelled {
            reason: CancelReason::UpstreamFailed(StepId::new("fetch"))
        })
    );
    assert_eq!(exec.call_count(&StepId::new("parse")).await, 0);
    assert_eq!(
        result.get(&StepId::new("audit")).unwrap().status,
        StepStatus::Completed
    );
}

/// Test: cancelling mid-run lets in-flight steps finish and skips the rest.
#[tokio::test]
async fn test_cancel_mid_run() {
    let exec = Arc::new(ScriptedExecutor::new().delay("slow", Duration::from_millis(100)));
    let plan = plan(vec![
        Step::new("slow", "slow", "echo"),
        Step::new("after", "after", "echo").depends_on(["slow"]),
    ]);

    let pool = ExecutionPool::with_concurrency(2);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = pool.execute_with_cancel(&plan, exec.clone(), token).await;

    assert!(result.cancelled);
    assert_eq!(
        result.get(&StepId::new("slow")).unwrap().status,
        StepStatus::Completed
    );
    let after = result.get(&StepId::new("after")).unwrap();
    assert_eq!(after.status, StepStatus::Cancelled);
    assert_eq!(
        after.error,
        Some(StepError::Cancelled {
            reason: CancelReason::PoolCancelled
        })
    );
    assert_eq!(exec.call_count(&StepId::new("after")).await, 0);
}

/// Test: a hung step times out and the pool keeps going.
#[tokio::test]
async fn test_timeout_does_not_stall_pool() {
    let exec = Arc::new(
        ScriptedExecutor::new()
            .delay("hang", Duration::from_secs(30))
            .delay("quick", Duration::from_millis(5)),
    );
    let plan = plan(vec![
        Step::new("hang", "hang", "echo"),
        Step::new("quick", "quick", "echo"),
    ]);
    let config = PoolConfig::with_concurrency(2).with_step_timeout(Duration::from_millis(50));

    let result = ExecutionPool::new(config).execute(&plan, exec).await;

    let hang = result.get(&StepId::new("hang")).unwrap();
    assert_eq!(hang.status, StepStatus::Failed);
    assert!(hang.error.as_ref().is_some_and(StepError::is_timeout));
    assert_eq!(
        result.get(&StepId::new("quick")).unwrap().status,
        StepStatus::Completed
    );
    assert!(result.total_duration_ms < 1_000);
}
