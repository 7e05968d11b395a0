//! Core domain types: identifiers, stored tasks, mission plans, and the
//! retry policy.

pub mod plan;
pub mod retry;
pub mod task;
pub mod types;
