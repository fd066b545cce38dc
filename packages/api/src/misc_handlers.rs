// ABOUTME: Health check and the placeholder MCP execution endpoint
// ABOUTME: Neither touches sessions

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Echoes the request back until MCP tool execution is wired to a sandbox
pub async fn mcp_execute(Json(input): Json<Value>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": "MCP tool execution stub called",
        "input": input,
    }))
}
