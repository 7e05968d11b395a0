//! Rate limiting middleware.
//!
//! Clients identify themselves with `x-client-id` (default `anonymous`). The
//! tier comes from the limiter's client table, never from the request. Every
//! response carries the `X-RateLimit-*` headers.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::ratelimit::RateLimitDecision;

use super::errors::ApiError;
use super::handlers::ApiState;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const ANONYMOUS_CLIENT: &str = "anonymous";

pub async fn rate_limit(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.clone() else {
        return next.run(req).await;
    };

    let headers = req.headers();
    let identifier = header_str(headers, CLIENT_ID_HEADER)
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string();
    let tier = limiter.tier_for(&identifier);
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let decision = limiter.check(&identifier, &endpoint, tier).await;

    let mut response = match decision.into_result() {
        Ok(_) => next.run(req).await,
        Err(e) => {
            tracing::debug!(client = %identifier, endpoint = %endpoint, %tier, "rate limited");
            ApiError::from(e).into_response()
        }
    };
    apply_headers(response.headers_mut(), &decision);
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    for (name, value) in [
        ("x-ratelimit-limit", decision.limit),
        ("x-ratelimit-remaining", decision.remaining),
        ("x-ratelimit-reset", decision.reset_at),
    ] {
        headers.insert(name, HeaderValue::from(value));
    }
}
