//! HTTP API module.
//!
//! Provides REST endpoints for running missions and managing tasks. Every
//! route sits behind the rate limiting middleware.

mod errors;
mod handlers;
mod ratelimit;
mod responses;

pub use errors::{ApiError, ErrorBody, ErrorResponse};
pub use handlers::{ApiState, ListTasksQuery};
pub use ratelimit::{ANONYMOUS_CLIENT, CLIENT_ID_HEADER};
pub use responses::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;

/// Build the API router with all endpoints.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        // Missions
        .route("/api/missions", post(handlers::run_mission))
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/api/tasks/ready", get(handlers::ready_tasks))
        .route("/api/tasks/stats", get(handlers::task_stats))
        .route(
            "/api/tasks/{task_id}",
            get(handlers::get_task)
                .patch(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route(
            "/api/tasks/{task_id}/complete",
            post(handlers::complete_task),
        )
        // Middleware
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server(
    config: &ApiConfig,
    state: ApiState,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config.bind_addr();

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
