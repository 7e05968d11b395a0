//! Mission plans: an immutable, dependency-ordered set of steps.
//!
//! Steps reference each other through `depends_on`; a valid plan forms a DAG
//! over step ids. Validation runs Kahn's algorithm once and reports the first
//! structural problem found.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

use super::types::{MissionId, StepId};

/// Structural problems that make a plan invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    /// A cycle was detected among the listed steps.
    #[error("cycle detected involving steps: {}", join_ids(.0))]
    CycleDetected(Vec<StepId>),

    /// A dependency references a step that doesn't exist.
    #[error("step '{from}' depends on non-existent step '{to}'")]
    MissingDependency { from: StepId, to: StepId },

    /// A step lists itself as a dependency.
    #[error("step '{0}' cannot depend on itself")]
    SelfDependency(StepId),

    /// Two steps share an id.
    #[error("duplicate step id: {0}")]
    DuplicateStep(StepId),

    /// A step names a tool the registry doesn't know.
    #[error("step '{step}' uses unknown tool '{tool}'")]
    UnknownTool { step: StepId, tool: String },
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter().map(StepId::as_str).collect::<Vec<_>>().join(", ")
}

/// Coarse complexity tier assigned by the planner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Trivial,
    #[default]
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComplexityTier::Trivial => "trivial",
            ComplexityTier::Simple => "simple",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Complex => "complex",
            ComplexityTier::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One atomic unit of execution mapped to a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub action: String,
    pub tool: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub depends_on: BTreeSet<StepId>,
    /// Per-step deadline override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    /// Create a step with an empty payload and no dependencies.
    pub fn new(id: impl Into<StepId>, action: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            tool: tool.into(),
            payload: Value::Null,
            depends_on: BTreeSet::new(),
            timeout_ms: None,
        }
    }

    /// Builder: set the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Builder: add dependencies.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder: set a per-step deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A validated plan. Plans are never mutated after building; a retry derives
/// a new plan with [`MissionPlan::restrict_to`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionPlan {
    pub mission_id: MissionId,
    pub mission_type: String,
    pub complexity: ComplexityTier,
    pub steps: Vec<Step>,
    pub estimated_cost: f64,
    pub required_capabilities: BTreeSet<String>,
    pub reasoning: String,
    /// Set by test harnesses to force verification failure.
    #[serde(default)]
    pub forced_failure: bool,
}

impl MissionPlan {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Look up a step by id.
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// All step ids, in plan order.
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Steps that directly depend on the given step.
    pub fn downstream(&self, id: &StepId) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(id))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Tools used by the plan, deduplicated.
    pub fn tools(&self) -> BTreeSet<String> {
        self.steps.iter().map(|s| s.tool.clone()).collect()
    }

    /// Validate structure and return the steps in a topological order.
    pub fn validate(&self) -> Result<Vec<StepId>, PlanValidationError> {
        validate_steps(&self.steps)
    }

    /// Derive a plan containing only `keep`. Dependencies on steps outside the
    /// subset are dropped: those steps already completed.
    pub fn restrict_to(&self, keep: &HashSet<StepId>) -> MissionPlan {
        let steps = self
            .steps
            .iter()
            .filter(|s| keep.contains(&s.id))
            .map(|s| {
                let mut step = s.clone();
                step.depends_on.retain(|d| keep.contains(d));
                step
            })
            .collect();

        MissionPlan {
            steps,
            ..self.clone()
        }
    }
}

/// Validate a list of steps and return them in topological order.
pub fn validate_steps(steps: &[Step]) -> Result<Vec<StepId>, PlanValidationError> {
    let mut ids: HashSet<&StepId> = HashSet::with_capacity(steps.len());
    for step in steps {
        if !ids.insert(&step.id) {
            return Err(PlanValidationError::DuplicateStep(step.id.clone()));
        }
    }

    for step in steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(PlanValidationError::SelfDependency(step.id.clone()));
            }
            if !ids.contains(dep) {
                return Err(PlanValidationError::MissingDependency {
                    from: step.id.clone(),
                    to: dep.clone(),
                });
            }
        }
    }

    // Kahn's algorithm, seeded in plan order so the result is deterministic.
    let mut in_degree: HashMap<&StepId, usize> = HashMap::with_capacity(steps.len());
    let mut reverse_deps: HashMap<&StepId, Vec<&StepId>> = HashMap::with_capacity(steps.len());
    for step in steps {
        in_degree.insert(&step.id, step.depends_on.len());
        for dep in &step.depends_on {
            reverse_deps.entry(dep).or_default().push(&step.id);
        }
    }

    let mut queue: VecDeque<&StepId> = steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| &s.id)
        .collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        if let Some(downstream) = reverse_deps.get(id) {
            for next in downstream {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }
    }

    if order.len() != steps.len() {
        let cycle: Vec<StepId> = steps
            .iter()
            .filter(|s| in_degree.get(&s.id).copied().unwrap_or(0) > 0)
            .map(|s| s.id.clone())
            .collect();
        return Err(PlanValidationError::CycleDetected(cycle));
    }

    Ok(order)
}
