//! Deterministic planner backed by per-mission-type templates.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use super::{PlanError, PlanRequest, Planner, PlannerResponse};
use crate::core::plan::{ComplexityTier, Step};

/// Mission type used when the request names none.
pub const GENERAL_MISSION_TYPE: &str = "general";

/// Planner that answers from a fixed table of plan templates.
///
/// Requests that name a mission type get that type's template. Requests
/// without one get a single `echo` step carrying the mission text, unless a
/// template is registered under [`GENERAL_MISSION_TYPE`].
#[derive(Debug, Clone, Default)]
pub struct TemplatePlanner {
    templates: BTreeMap<String, PlannerResponse>,
}

impl TemplatePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(templates: impl IntoIterator<Item = PlannerResponse>) -> Self {
        let mut planner = Self::new();
        for template in templates {
            planner.insert(template);
        }
        planner
    }

    /// Register a template under its own mission type, replacing any previous one.
    pub fn insert(&mut self, template: PlannerResponse) {
        self.templates
            .insert(template.mission_type.clone(), template);
    }

    pub fn with_template(mut self, template: PlannerResponse) -> Self {
        self.insert(template);
        self
    }

    pub fn mission_types(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    fn fallback(request: &PlanRequest) -> PlannerResponse {
        let step = Step::new("respond", request.mission.clone(), "echo").with_payload(json!({
            "mission": request.mission,
            "context": request.context,
        }));
        PlannerResponse {
            mission_type: GENERAL_MISSION_TYPE.to_string(),
            complexity: ComplexityTier::Trivial,
            steps: vec![step],
            reasoning: "no template matched; echoing mission".to_string(),
        }
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<PlannerResponse, PlanError> {
        match request.mission_type.as_deref() {
            Some(kind) => self.templates.get(kind).cloned().ok_or_else(|| {
                PlanError::Planning(format!("no plan template for mission type '{}'", kind))
            }),
            None => Ok(self
                .templates
                .get(GENERAL_MISSION_TYPE)
                .cloned()
                .unwrap_or_else(|| Self::fallback(request))),
        }
    }
}
