//! Plan building.
//!
//! Classification and step generation are delegated to a [`Planner`]. The
//! [`PlanBuilder`] owns everything deterministic about a plan: structural
//! validation, tool resolution against the registry, capability aggregation,
//! and cost estimation. Given the same planner response it always produces
//! the same plan.

mod template;

pub use template::{GENERAL_MISSION_TYPE, TemplatePlanner};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::plan::{ComplexityTier, MissionPlan, PlanValidationError, Step, validate_steps};
use crate::core::types::MissionId;
use crate::learning::PatternHint;
use crate::tools::ToolRegistry;

/// Errors raised while producing a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The planner failed or returned output that could not be parsed.
    #[error("planning failed: {0}")]
    Planning(String),

    /// The planner's steps do not form a valid plan.
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanValidationError),
}

/// Input handed to the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub mission_id: MissionId,
    pub mission: String,
    /// Caller metadata, passed through untouched.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Historical patterns for this kind of mission.
    #[serde(default)]
    pub hints: Vec<PatternHint>,
    /// Mission type suggested by the caller.
    #[serde(default)]
    pub mission_type: Option<String>,
}

impl PlanRequest {
    pub fn new(mission: impl Into<String>) -> Self {
        Self {
            mission_id: MissionId::new(),
            mission: mission.into(),
            ..Self::default()
        }
    }
}

/// Structured planner output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerResponse {
    pub mission_type: String,
    #[serde(default)]
    pub complexity: ComplexityTier,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub reasoning: String,
}

impl PlannerResponse {
    /// Parse raw planner text. Text surrounding the outermost JSON object,
    /// such as a Markdown code fence, is ignored.
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        let start = text.find('{');
        let end = text.rfind('}');
        let body = match (start, end) {
            (Some(s), Some(e)) if s < e => &text[s..=e],
            _ => {
                return Err(PlanError::Planning(
                    "planner output contains no JSON object".into(),
                ));
            }
        };
        serde_json::from_str(body)
            .map_err(|e| PlanError::Planning(format!("unparseable planner output: {}", e)))
    }
}

/// Classification and step generation backend.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<PlannerResponse, PlanError>;
}

/// Cost model: a base per complexity tier plus a per-step increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub per_step: f64,
}

impl CostModel {
    pub fn tier_base(tier: ComplexityTier) -> f64 {
        match tier {
            ComplexityTier::Trivial => 0.01,
            ComplexityTier::Simple => 0.05,
            ComplexityTier::Moderate => 0.15,
            ComplexityTier::Complex => 0.40,
            ComplexityTier::Critical => 1.00,
        }
    }

    pub fn estimate(&self, tier: ComplexityTier, steps: usize) -> f64 {
        Self::tier_base(tier) + self.per_step * steps as f64
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self { per_step: 0.02 }
    }
}

/// Turns planner output into validated [`MissionPlan`]s.
pub struct PlanBuilder {
    planner: Arc<dyn Planner>,
    registry: Arc<ToolRegistry>,
    cost: CostModel,
}

impl PlanBuilder {
    pub fn new(planner: Arc<dyn Planner>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            planner,
            registry,
            cost: CostModel::default(),
        }
    }

    pub fn with_cost_model(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Ask the planner for steps and assemble a plan.
    pub async fn build(
        &self,
        request: &PlanRequest,
        force_failure: bool,
    ) -> Result<MissionPlan, PlanError> {
        debug!(mission = %request.mission_id, hints = request.hints.len(), "requesting plan");
        let response = self.planner.plan(request).await?;
        let plan = self.assemble(request.mission_id, response, force_failure)?;

        info!(
            mission = %plan.mission_id,
            mission_type = %plan.mission_type,
            complexity = %plan.complexity,
            steps = plan.len(),
            cost = plan.estimated_cost,
            "plan built"
        );
        Ok(plan)
    }

    /// Validate a planner response and derive cost and capabilities.
    pub fn assemble(
        &self,
        mission_id: MissionId,
        response: PlannerResponse,
        force_failure: bool,
    ) -> Result<MissionPlan, PlanError> {
        validate_steps(&response.steps)?;

        let mut required_capabilities = BTreeSet::new();
        for step in &response.steps {
            if !self.registry.contains(&step.tool) {
                return Err(PlanValidationError::UnknownTool {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                }
                .into());
            }
            required_capabilities.extend(self.registry.capabilities(&step.tool));
        }

        let estimated_cost = self.cost.estimate(response.complexity, response.steps.len());

        Ok(MissionPlan {
            mission_id,
            mission_type: response.mission_type,
            complexity: response.complexity,
            steps: response.steps,
            estimated_cost,
            required_capabilities,
            reasoning: response.reasoning,
            forced_failure: force_failure,
        })
    }
}
