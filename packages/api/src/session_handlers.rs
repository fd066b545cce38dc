// ABOUTME: HTTP handlers for session lifecycle, messaging and event streaming
// ABOUTME: Thin layer over the session orchestrator

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_agent::SessionInfo;
use warden_sandbox::SandboxPorts;

use crate::error::ApiResult;
use crate::sse::{create_sse_response, session_frames};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: &'static str,
    pub ports: Option<SandboxPorts>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<CreateSessionResponse>> {
    info!(user_id = %request.user_id, "Creating session");

    let session = state.orchestrator.create_session(&request.user_id).await?;

    Ok(Json(CreateSessionResponse {
        session_id: session.session_id,
        status: "created",
        ports: session.ports,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state
        .orchestrator
        .send_message(&request.session_id, &request.message)
        .await?;

    Ok(Json(StatusResponse {
        status: "message_received",
    }))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> Json<StatusResponse> {
    info!(session_id = %request.session_id, "Stopping session");
    state.orchestrator.stop_session(&request.session_id).await;
    Json(StatusResponse { status: "stopped" })
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.orchestrator.session(&session_id).await?))
}

pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let events = state.orchestrator.events(&session_id).await?;
    info!(session_id = %session_id, "Event stream opened");
    Ok(create_sse_response(session_frames(events)))
}
