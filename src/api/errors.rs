//! API error types and HTTP status mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::mission::OverseerError;
use crate::planning::PlanError;
use crate::ratelimit::RateLimitError;
use crate::storage::StoreError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or invalid request.
    BadRequest(String),
    /// Resource not found.
    NotFound(String),
    /// Request conflicts with current state (e.g., dependency cycle).
    Conflict(String),
    /// Plan could not be built from the request.
    InvalidPlan(String),
    /// Caller exceeded its rate limit.
    RateLimited { limit: u64, reset_at: u64 },
    /// A collaborator (planner, verifier) failed.
    BadGateway(String),
    /// Backing store unavailable.
    ServiceUnavailable(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::InvalidPlan(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_PLAN", msg, None)
            }
            ApiError::RateLimited { limit, reset_at } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "Too many requests, please try again later".to_string(),
                Some(json!({ "limit": limit, "resetAt": reset_at })),
            ),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg, None),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None)
            }
        };

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskNotFound(id) => ApiError::NotFound(format!("task not found: {}", id)),
            StoreError::DependencyCycle(_) => ApiError::Conflict(err.to_string()),
            StoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
            StoreError::Unavailable(msg) => ApiError::ServiceUnavailable(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::InvalidPlan(e) => ApiError::InvalidPlan(e.to_string()),
            PlanError::Planning(msg) => ApiError::BadGateway(msg),
        }
    }
}

impl From<OverseerError> for ApiError {
    fn from(err: OverseerError) -> Self {
        match err {
            OverseerError::Planning(e) => e.into(),
            OverseerError::Store(e) => e.into(),
            OverseerError::Verification(e) => ApiError::BadGateway(e.to_string()),
            OverseerError::Transition(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded { limit, reset_at } => {
                ApiError::RateLimited { limit, reset_at }
            }
            RateLimitError::Backend(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}
