//! API integration tests.
//!
//! These tests drive the router in-process with `tower::ServiceExt::oneshot`.

use overseer::api::{ApiState, build_router};
use overseer::ratelimit::{MemoryBackend, RateLimitRule};
use overseer::testing::StaticPlanner;
use overseer::{
    CheckVerifier, Overseer, PlanBuilder, RateLimitTier, RateLimiter, Step, TaskStore, TierRules,
    ToolRegistry,
};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> ApiState {
    let planner = StaticPlanner::from_steps(
        "report",
        vec![
            Step::new("fetch", "fetch", "echo").with_payload(json!({ "artifact": "data.csv" })),
            Step::new("render", "render", "echo")
                .with_payload(json!({ "format": "pdf" }))
                .depends_on(["fetch"]),
        ],
    );
    let builder = PlanBuilder::new(Arc::new(planner), Arc::new(ToolRegistry::with_builtins()));
    let store = Arc::new(TaskStore::in_memory());
    let overseer = Overseer::new(builder, Arc::new(CheckVerifier::new())).with_task_store(store.clone());
    ApiState::new(Arc::new(overseer), store)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let router = build_router(test_state());
    let (status, json) = send(&router, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: tasks can be created, read, patched, completed and deleted.
#[tokio::test]
async fn test_task_crud() {
    let router = build_router(test_state());

    let (status, first) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({ "title": "write docs", "priority": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "ready");
    let first_id = first["id"].as_str().unwrap().to_string();

    let (status, second) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({ "title": "publish", "dependencies": [first_id] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["status"], "pending");
    let second_id = second["id"].as_str().unwrap().to_string();

    let (status, ready) = send(&router, Method::GET, "/api/tasks/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["count"], 1);
    assert_eq!(ready["tasks"][0]["id"], first_id.as_str());

    let (status, patched) = send(
        &router,
        Method::PATCH,
        &format!("/api/tasks/{}", first_id),
        Some(json!({ "description": "for the 1.0 release" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["id"], first_id.as_str());
    assert_eq!(patched["createdAt"], first["createdAt"]);

    let (status, done) = send(
        &router,
        Method::POST,
        &format!("/api/tasks/{}/complete", first_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");

    let (_, second) = send(&router, Method::GET, &format!("/api/tasks/{}", second_id), None).await;
    assert_eq!(second["status"], "ready");

    let (_, stats) = send(&router, Method::GET, "/api/tasks/stats", None).await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["ready"], 1);

    let (status, _) = send(&router, Method::DELETE, &format!("/api/tasks/{}", second_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&router, Method::GET, "/api/tasks?status=completed", None).await;
    assert_eq!(listed["count"], 1);
}

/// Test: unknown tasks map to 404 with the error envelope.
#[tokio::test]
async fn test_missing_task_is_not_found() {
    let router = build_router(test_state());
    let (status, json) = send(&router, Method::GET, "/api/tasks/nope", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&router, Method::POST, "/api/tasks/nope/complete", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: an empty title is a bad request.
#[tokio::test]
async fn test_invalid_task_is_bad_request() {
    let router = build_router(test_state());
    let (status, json) = send(&router, Method::POST, "/api/tasks", Some(json!({ "title": "" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

/// Test: running a mission returns the result and records a completed task.
#[tokio::test]
async fn test_run_mission() {
    let router = build_router(test_state());

    let (status, json) = send(
        &router,
        Method::POST,
        "/api/missions",
        Some(json!({ "mission": "weekly report", "missionType": "report" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["state"], "completed");
    assert_eq!(json["attempts"], 1);
    assert_eq!(json["artifacts"][0], "data.csv");

    let (_, stats) = send(&router, Method::GET, "/api/tasks/stats", None).await;
    assert_eq!(stats["completed"], 1);
}

/// Test: an empty mission is rejected before planning.
#[tokio::test]
async fn test_empty_mission_rejected() {
    let router = build_router(test_state());
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/missions",
        Some(json!({ "mission": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: the N+1th request gets a 429 with rate limit headers and body.
#[tokio::test]
async fn test_rate_limit_rejects_with_headers() {
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryBackend::new()),
        TierRules::uniform(RateLimitRule::new(2, 60_000)),
    ));
    let router = build_router(test_state().with_limiter(limiter));

    let request = || {
        Request::builder()
            .uri("/api/tasks/stats")
            .header("x-client-id", "tester")
            .body(Body::empty())
            .unwrap()
    };

    for remaining in ["1", "0"] {
        let response = router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    let response = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let reset: u64 = response.headers()["x-ratelimit-reset"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(json["error"]["details"]["limit"], 2);
    assert_eq!(json["error"]["details"]["resetAt"], reset);

    // Another client has its own window.
    let other = Request::builder()
        .uri("/api/tasks/stats")
        .header("x-client-id", "someone-else")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(other).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Test: path parameters share one rate limit key per route.
#[tokio::test]
async fn test_rate_limit_keys_by_route() {
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryBackend::new()),
        TierRules::uniform(RateLimitRule::new(1, 60_000)),
    ));
    let router = build_router(test_state().with_limiter(limiter));

    let (first, _) = send(&router, Method::GET, "/api/tasks/a", None).await;
    let (second, _) = send(&router, Method::GET, "/api/tasks/b", None).await;

    assert_eq!(first, StatusCode::NOT_FOUND);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
}

fn tiered_limiter() -> Arc<RateLimiter> {
    let rules = TierRules {
        standard: RateLimitRule::new(2, 60_000),
        premium: RateLimitRule::new(5, 60_000),
        enterprise: RateLimitRule::new(50, 60_000),
    };
    Arc::new(
        RateLimiter::new(Arc::new(MemoryBackend::new()), rules)
            .with_client_tiers([("acme", RateLimitTier::Enterprise)]),
    )
}

fn stats_request(client: &str, claimed_tier: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/api/tasks/stats")
        .header("x-client-id", client);
    if let Some(tier) = claimed_tier {
        builder = builder.header("x-client-tier", tier);
    }
    builder.body(Body::empty()).unwrap()
}

/// Test: a tier claimed in request headers does not raise the limit.
#[tokio::test]
async fn test_claimed_tier_header_is_ignored() {
    let router = build_router(test_state().with_limiter(tiered_limiter()));

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(stats_request("mallory", Some("enterprise")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    }

    let response = router
        .clone()
        .oneshot(stats_request("mallory", Some("enterprise")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

/// Test: a client with a configured tier gets that tier's limit.
#[tokio::test]
async fn test_configured_client_gets_its_tier() {
    let router = build_router(test_state().with_limiter(tiered_limiter()));

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(stats_request("acme", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "50");
    }

    // A downgrade claim from a configured client changes nothing either.
    let response = router
        .clone()
        .oneshot(stats_request("acme", Some("standard")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "46");
}
