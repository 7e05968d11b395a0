//! Mission orchestration: the lifecycle state machine and the overseer that
//! drives it.

mod overseer;
pub mod state;

pub use overseer::{
    ESCALATED_TAG, Escalation, MissionContext, MissionResult, Overseer, OverseerError, retry_plan,
};
pub use state::{InvalidTransition, MissionState};
