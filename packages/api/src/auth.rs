// ABOUTME: Bearer token authentication middleware
// ABOUTME: Rejects unauthenticated requests before any handler runs; /health is open

use axum::{
    extract::{Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;

/// Paths that don't require authentication
const WHITELISTED_PATHS: &[&str] = &["/health"];

/// Paths where the token may also come from `?token=`, for EventSource clients
const QUERY_TOKEN_PREFIX: &str = "/events/";

#[derive(Clone)]
pub struct AuthConfig {
    token: Arc<str>,
}

impl AuthConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }

    fn accepts(&self, candidate: &str) -> bool {
        constant_time_eq(self.token.as_bytes(), candidate.as_bytes())
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("token", &"<redacted>").finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn requires_authentication(path: &str) -> bool {
    !WHITELISTED_PATHS.contains(&path)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn query_token(request: &Request) -> Option<String> {
    if !request.uri().path().starts_with(QUERY_TOKEN_PREFIX) {
        return None;
    }
    Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.token)
}

pub async fn require_token(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    if !requires_authentication(&path) {
        return Ok(next.run(request).await);
    }

    let token = bearer_token(&request).or_else(|| query_token(&request));

    match token {
        Some(token) if auth.accepts(&token) => {
            debug!(path = %path, "Bearer token accepted");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %path, "Invalid bearer token");
            Err(AppError::Unauthorized)
        }
        None => {
            warn!(path = %path, "Missing bearer token");
            Err(AppError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "ok"
    }

    fn create_test_app() -> Router {
        let auth = AuthConfig::new("secret-token");
        Router::new()
            .route("/health", get(test_handler))
            .route("/agent/test", get(test_handler))
            .route("/events/{id}", get(test_handler))
            .layer(middleware::from_fn_with_state(auth, require_token))
    }

    async fn status_of(request: Request<Body>) -> StatusCode {
        create_test_app().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let request = Request::builder()
            .uri("/agent/test")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_token_rejected() {
        let request = Request::builder()
            .uri("/agent/test")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_bearer_accepted() {
        let request = Request::builder()
            .uri("/agent/test")
            .header("Authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_token_only_for_event_streams() {
        let events = Request::builder()
            .uri("/events/abc?token=secret-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(events).await, StatusCode::OK);

        let other = Request::builder()
            .uri("/agent/test?token=secret-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(other).await, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", AuthConfig::new("secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
