//! Verification of execution results.
//!
//! A [`Verifier`] turns a finished pool run into a [`VerificationReport`]: a
//! list of named checks, an overall verdict, and a quality score in 0..=100
//! that the overseer compares against its retry threshold.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::plan::MissionPlan;
use crate::execution::{PoolResult, StepStatus};

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("verifier failed: {0}")]
    Failed(String),
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    /// 0..=100.
    pub quality_score: f64,
    pub recommendations: Vec<String>,
}

impl VerificationReport {
    /// Build a report. The verdict passes only when every check passed; an
    /// empty check list does not pass. The score is clamped to 0..=100.
    pub fn new(checks: Vec<CheckResult>, quality_score: f64) -> Self {
        let passed = !checks.is_empty() && checks.iter().all(|c| c.passed);
        let recommendations = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("resolve '{}': {}", c.name, c.detail))
            .collect();
        Self {
            passed,
            checks,
            quality_score: quality_score.clamp(0.0, 100.0),
            recommendations,
        }
    }

    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

/// Verification backend.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        plan: &MissionPlan,
        result: &PoolResult,
    ) -> Result<VerificationReport, VerifierError>;
}

/// Structural verifier over pool results.
///
/// Checks, with their share of the quality score:
/// - `steps_completed` (60): fraction of steps that completed.
/// - `no_failures` (20): no step failed or timed out.
/// - `outputs_present` (20): fraction of completed steps with a non-null output.
/// - `not_forced_to_fail`: a plan built with `forced_failure` scores zero.
#[derive(Debug, Clone, Default)]
pub struct CheckVerifier;

impl CheckVerifier {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(&self, plan: &MissionPlan, result: &PoolResult) -> VerificationReport {
        let total = result.total();
        let completion = if total == 0 {
            1.0
        } else {
            result.completed_count as f64 / total as f64
        };

        let completed: Vec<_> = result
            .results
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .collect();
        let with_output = completed
            .iter()
            .filter(|r| !matches!(r.output, None | Some(Value::Null)))
            .count();
        let output_ratio = if completed.is_empty() {
            1.0
        } else {
            with_output as f64 / completed.len() as f64
        };

        let mut checks = Vec::with_capacity(4);

        let detail = format!("{}/{} steps completed", result.completed_count, total);
        checks.push(if result.completed_count == total {
            CheckResult::pass("steps_completed", detail)
        } else {
            CheckResult::fail("steps_completed", detail)
        });

        checks.push(if result.failed_count == 0 {
            CheckResult::pass("no_failures", "no step failed")
        } else {
            let first = result
                .first_error()
                .map(|e| e.to_string())
                .unwrap_or_default();
            CheckResult::fail(
                "no_failures",
                format!("{} step(s) failed; first: {}", result.failed_count, first),
            )
        });

        let detail = format!("{}/{} completed steps produced output", with_output, completed.len());
        checks.push(if with_output == completed.len() {
            CheckResult::pass("outputs_present", detail)
        } else {
            CheckResult::fail("outputs_present", detail)
        });

        let mut score = 60.0 * completion
            + if result.failed_count == 0 { 20.0 } else { 0.0 }
            + 20.0 * output_ratio;

        if plan.forced_failure {
            checks.push(CheckResult::fail(
                "not_forced_to_fail",
                "plan was built with forced failure",
            ));
            score = 0.0;
        } else {
            checks.push(CheckResult::pass("not_forced_to_fail", "no forced failure"));
        }

        VerificationReport::new(checks, score)
    }
}

#[async_trait]
impl Verifier for CheckVerifier {
    async fn verify(
        &self,
        plan: &MissionPlan,
        result: &PoolResult,
    ) -> Result<VerificationReport, VerifierError> {
        Ok(self.evaluate(plan, result))
    }
}
