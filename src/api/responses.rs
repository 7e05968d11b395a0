//! API response types.

use serde::Serialize;

use crate::core::task::Task;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// List of tasks response.
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub count: usize,
}

impl From<Vec<Task>> for TaskListResponse {
    fn from(tasks: Vec<Task>) -> Self {
        let count = tasks.len();
        Self { tasks, count }
    }
}

/// Generic message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
