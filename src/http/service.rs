//! Rate limit service HTTP handlers.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::headers;
use super::middleware::{enforce, PolicyGuard};
use crate::error::TallyError;
use crate::ratelimit::{now_millis, Identifier, Policy, PolicyTable, RateLimiter};

/// Shared state for the rate limit service.
#[derive(Clone)]
pub struct AppState {
    /// The rate limiter instance
    pub limiter: Arc<RateLimiter>,
    /// Named policies callers may ask for
    pub policies: Arc<PolicyTable>,
}

impl AppState {
    /// Create the service state.
    pub fn new(limiter: Arc<RateLimiter>, policies: PolicyTable) -> Self {
        Self {
            limiter,
            policies: Arc::new(policies),
        }
    }
}

/// Body of a rate limit decision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Name of the policy to apply
    pub policy: String,
    /// Identifier to account against; derived from headers when absent
    #[serde(default)]
    pub identifier: Option<String>,
}

/// A named policy as listed by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyView {
    /// Name the policy is registered under
    pub name: String,
    /// Width of the accounting window in milliseconds
    pub window_ms: u64,
    /// Maximum admits per window
    pub max_requests: u32,
}

/// Error response with a JSON `{ "error": ... }` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        let status = match &err {
            TallyError::UnknownPolicy(_) => StatusCode::NOT_FOUND,
            TallyError::Config(_) => StatusCode::BAD_REQUEST,
            TallyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Build the service router.
///
/// `/v1/policies` is itself limited by the `API_REQUEST` policy.
pub fn router(state: AppState) -> Router {
    let api_policy = state
        .policies
        .get(PolicyTable::API_REQUEST)
        .copied()
        .unwrap_or(Policy::API_REQUEST);
    let api_guard = PolicyGuard::new(Arc::clone(&state.limiter), api_policy);

    Router::new()
        .route("/health", get(health))
        .route("/v1/ratelimit", post(check_rate_limit))
        .route(
            "/v1/policies",
            get(list_policies).route_layer(middleware::from_fn_with_state(api_guard, enforce)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Decide whether a request is admitted under a named policy.
///
/// Responds `200` with the decision when admitted and `429` when denied.
#[instrument(skip_all, fields(policy = %request.policy))]
async fn check_rate_limit(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    debug!(identifier = ?request.identifier, "Processing rate limit request");

    let policy = state.policies.require(&request.policy).map_err(|e| {
        warn!(error = %e, "Received rate limit request for unknown policy");
        ApiError::from(e)
    })?;

    let identifier = match request.identifier {
        Some(id) if id.trim().is_empty() => {
            warn!("Received rate limit request with empty identifier");
            return Err(ApiError::bad_request("identifier must not be empty"));
        }
        Some(id) => id,
        None => Identifier::from_headers(&request_headers).to_key(),
    };

    let now = now_millis();
    let decision = state.limiter.check_at(&identifier, &policy, now);

    info!(
        identifier = %identifier,
        allowed = decision.allowed,
        remaining = decision.remaining,
        "Rate limit decision made"
    );

    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = (status, Json(&decision)).into_response();
    headers::apply(response.headers_mut(), &decision, now);
    Ok(response)
}

async fn list_policies(State(state): State<AppState>) -> Json<Vec<PolicyView>> {
    let policies = state
        .policies
        .iter()
        .map(|(name, policy)| PolicyView {
            name: name.to_string(),
            window_ms: policy.window_ms(),
            max_requests: policy.max_requests(),
        })
        .collect();
    Json(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header::CONTENT_TYPE, Request as HttpRequest};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut policies = PolicyTable::new();
        policies.insert("TINY", Policy::new(60_000, 2).unwrap());
        AppState::new(Arc::new(RateLimiter::new()), policies)
    }

    fn check(body: &str, headers: &[(&str, &str)]) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/v1/ratelimit")
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(test_state())
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_check_admits_then_denies() {
        let state = test_state();
        let body = r#"{"policy":"TINY","identifier":"user:1"}"#;

        for expected_remaining in [1, 0] {
            let response = router(state.clone()).oneshot(check(body, &[])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()["x-ratelimit-remaining"],
                expected_remaining.to_string().as_str()
            );
            let decision: serde_json::Value = json_body(response).await;
            assert_eq!(decision["allowed"], true);
            assert_eq!(decision["limit"], 2);
        }

        let response = router(state.clone()).oneshot(check(body, &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        let decision: serde_json::Value = json_body(response).await;
        assert_eq!(decision["allowed"], false);
        assert_eq!(decision["remaining"], 0);
        assert!(decision["reason"].is_string());
    }

    #[tokio::test]
    async fn test_check_derives_identifier_from_headers() {
        let state = test_state();
        let response = router(state.clone())
            .oneshot(check(
                r#"{"policy":"AUTH"}"#,
                &[("x-forwarded-for", "192.0.2.10, 10.0.0.1")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let entry = state.limiter.window("ip:192.0.2.10").unwrap();
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn test_check_unknown_policy() {
        let response = router(test_state())
            .oneshot(check(r#"{"policy":"NOPE","identifier":"x"}"#, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("NOPE"));
    }

    #[tokio::test]
    async fn test_check_empty_identifier_rejected() {
        let response = router(test_state())
            .oneshot(check(r#"{"policy":"AUTH","identifier":"  "}"#, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_response_matches_limiter() {
        let state = test_state();
        let response = router(state.clone())
            .oneshot(check(r#"{"policy":"AI_ANALYSIS","identifier":"user:9"}"#, &[]))
            .await
            .unwrap();

        let decision: serde_json::Value = json_body(response).await;
        let entry = state.limiter.window("user:9").unwrap();
        assert_eq!(decision["resetAt"], entry.reset_at);
        assert_eq!(decision["remaining"], 9);
        assert!(decision.get("reason").is_none());
    }

    #[tokio::test]
    async fn test_list_policies_is_rate_limited() {
        let mut policies = PolicyTable::new();
        policies.insert(PolicyTable::API_REQUEST, Policy::new(60_000, 1).unwrap());
        let state = AppState::new(Arc::new(RateLimiter::new()), policies);

        let list = || {
            HttpRequest::builder()
                .uri("/v1/policies")
                .header("x-user-id", "admin")
                .body(Body::empty())
                .unwrap()
        };

        let response = router(state.clone()).oneshot(list()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "1");
        let listed: Vec<PolicyView> = json_body(response).await;
        let names: Vec<&str> = listed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["AI_ANALYSIS", "API_REQUEST", "AUTH"]);
        assert_eq!(listed[0].window_ms, 3_600_000);
        assert_eq!(listed[0].max_requests, 10);

        let response = router(state).oneshot(list()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
