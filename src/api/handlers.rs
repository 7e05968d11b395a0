//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::task::{NewTask, Task, TaskPatch, TaskStats, TaskStatus};
use crate::core::types::TaskId;
use crate::mission::{MissionContext, MissionResult, Overseer};
use crate::ratelimit::RateLimiter;
use crate::storage::TaskStore;

use super::errors::ApiError;
use super::responses::{HealthResponse, MessageResponse, TaskListResponse};

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub overseer: Arc<Overseer>,
    pub store: Arc<TaskStore>,
    /// `None` disables admission control.
    pub limiter: Option<Arc<RateLimiter>>,
}

impl ApiState {
    pub fn new(overseer: Arc<Overseer>, store: Arc<TaskStore>) -> Self {
        Self {
            overseer,
            store,
            limiter: None,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }
}

/// Query parameters for list_tasks endpoint.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Run a mission to completion or escalation.
pub async fn run_mission(
    State(state): State<ApiState>,
    Json(ctx): Json<MissionContext>,
) -> Result<Json<MissionResult>, ApiError> {
    if ctx.mission.trim().is_empty() {
        return Err(ApiError::BadRequest("mission must not be empty".into()));
    }
    let result = state.overseer.run(ctx).await?;
    Ok(Json(result))
}

/// List tasks, optionally filtered by status.
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<TaskListResponse> {
    let mut tasks = state.store.get_all().await;
    if let Some(status) = query.status {
        tasks.retain(|t| t.status == status);
    }
    Json(TaskListResponse::from(tasks))
}

/// Create a task.
pub async fn create_task(
    State(state): State<ApiState>,
    Json(input): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state.store.create(input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Tasks that are ready to be picked up, highest priority first.
pub async fn ready_tasks(State(state): State<ApiState>) -> Json<TaskListResponse> {
    Json(TaskListResponse::from(state.store.get_ready().await))
}

/// Task counts per status.
pub async fn task_stats(State(state): State<ApiState>) -> Json<TaskStats> {
    Json(state.store.get_stats().await)
}

/// Get a specific task.
pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = TaskId::new(&task_id);
    let task = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("task not found: {}", id)))?;
    Ok(Json(task))
}

/// Apply a partial update to a task.
pub async fn update_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    let task = state.store.update(&TaskId::new(&task_id), patch).await?;
    Ok(Json(task))
}

/// Mark a task completed.
pub async fn complete_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = state.store.complete(&TaskId::new(&task_id)).await?;
    Ok(Json(task))
}

/// Delete a task.
pub async fn delete_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = state.store.delete(&TaskId::new(&task_id)).await?;
    Ok(Json(MessageResponse {
        message: format!("task '{}' deleted", task.id),
    }))
}
