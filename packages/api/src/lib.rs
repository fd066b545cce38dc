// ABOUTME: HTTP surface for Warden sessions
// ABOUTME: Router construction, authentication, SSE streaming and error mapping

pub mod auth;
pub mod error;
pub mod misc_handlers;
pub mod session_handlers;
pub mod sse;
pub mod state;

use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use auth::AuthConfig;
pub use error::{ApiResult, AppError};
pub use state::AppState;

/// Build the application router with auth, tracing and CORS applied
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(misc_handlers::health))
        .route("/agent/create", post(session_handlers::create_session))
        .route("/agent/message", post(session_handlers::send_message))
        .route("/agent/stop", post(session_handlers::stop_session))
        .route("/agent/{session_id}", get(session_handlers::get_session))
        .route("/events/{session_id}", get(session_handlers::session_events))
        .route("/mcp/execute", post(misc_handlers::mcp_execute))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
