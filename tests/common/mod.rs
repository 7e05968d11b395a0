//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use overseer::{ComplexityTier, LearningRecord, MemoryPatternStore, MissionId, MissionPlan, Step};
use std::collections::BTreeSet;
use std::time::Duration;

/// Wrap steps in a plan without going through a planner.
pub fn plan(steps: Vec<Step>) -> MissionPlan {
    MissionPlan {
        mission_id: MissionId::new(),
        mission_type: "test".to_string(),
        complexity: ComplexityTier::Simple,
        steps,
        estimated_cost: 0.0,
        required_capabilities: BTreeSet::new(),
        reasoning: String::new(),
        forced_failure: false,
    }
}

/// Wait until the pattern store holds at least `count` records.
///
/// Learning writes are spawned in the background, so tests poll instead of
/// sleeping for a fixed time.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_records(
    store: &MemoryPatternStore,
    count: usize,
    timeout: Duration,
) -> Vec<LearningRecord> {
    let start = tokio::time::Instant::now();
    loop {
        let records = store.records();
        if records.len() >= count {
            return records;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} learning record(s), have {}",
                count,
                records.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
