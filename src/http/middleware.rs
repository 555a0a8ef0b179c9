//! Middleware that enforces a rate limit policy on a route.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::headers;
use crate::ratelimit::{now_millis, Decision, Identifier, Policy, RateLimiter};

/// A limiter bound to the policy a route is protected by.
#[derive(Clone)]
pub struct PolicyGuard {
    limiter: Arc<RateLimiter>,
    policy: Policy,
}

impl PolicyGuard {
    /// Guard routes with `policy`, accounting in `limiter`.
    pub fn new(limiter: Arc<RateLimiter>, policy: Policy) -> Self {
        Self { limiter, policy }
    }

    /// The policy applied by this guard.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    /// Human-readable reason
    pub error: String,
    /// Epoch milliseconds at which the window resets
    pub reset_at: u64,
}

/// Rate limit middleware.
///
/// Derives the request's identifier from its headers and checks it against
/// the guard's policy. Denied requests get `429` and never reach the
/// handler; admitted responses carry the rate limit headers.
pub async fn enforce(State(guard): State<PolicyGuard>, request: Request, next: Next) -> Response {
    let identifier = Identifier::from_headers(request.headers());
    let now = now_millis();
    let decision = guard
        .limiter
        .check_at(&identifier.to_key(), &guard.policy, now);

    if !decision.allowed {
        warn!(
            identifier = %identifier,
            path = %request.uri().path(),
            reset_at = %decision.reset_at_iso(),
            "Request rate limited"
        );
        return rejection(&decision, now);
    }

    let mut response = next.run(request).await;
    headers::apply(response.headers_mut(), &decision, now);
    response
}

/// Build the `429` response for a denied decision.
pub fn rejection(decision: &Decision, now: u64) -> Response {
    let body = RejectionBody {
        error: decision
            .reason
            .clone()
            .unwrap_or_else(|| "rate limit exceeded".to_string()),
        reset_at: decision.reset_at,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    headers::apply(response.headers_mut(), decision, now);
    response
}
