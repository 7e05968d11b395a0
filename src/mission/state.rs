//! Mission lifecycle state machine.
//!
//! ```text
//! Planning -> Executing -> Verifying -> Completed
//!                 ^            |
//!                 |            +-> Retrying -> Executing
//!                 |            +-> Escalated
//! Planning | Executing | Verifying -> Failed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    Planning,
    Executing,
    Verifying,
    Retrying,
    Completed,
    Escalated,
    /// A collaborator error aborted the run.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid mission transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: MissionState,
    pub to: MissionState,
}

impl MissionState {
    pub fn allowed_transitions(&self) -> &'static [MissionState] {
        use MissionState::*;
        match self {
            Planning => &[Executing, Failed],
            Executing => &[Verifying, Failed],
            Verifying => &[Completed, Retrying, Escalated, Failed],
            Retrying => &[Executing],
            Completed | Escalated | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: MissionState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Validate and perform a transition.
    pub fn transition(&mut self, target: MissionState) -> Result<MissionState, InvalidTransition> {
        if !self.can_transition_to(target) {
            return Err(InvalidTransition {
                from: *self,
                to: target,
            });
        }
        let previous = *self;
        *self = target;
        Ok(previous)
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissionState::Planning => "planning",
            MissionState::Executing => "executing",
            MissionState::Verifying => "verifying",
            MissionState::Retrying => "retrying",
            MissionState::Completed => "completed",
            MissionState::Escalated => "escalated",
            MissionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
