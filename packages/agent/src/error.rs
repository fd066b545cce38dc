// ABOUTME: Error types for session orchestration and tool dispatch
// ABOUTME: Tool invocation failures never leave the dispatcher; they become error results

use std::time::Duration;
use thiserror::Error;
use warden_events::EventError;
use warden_sandbox::SandboxError;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Unknown session, or one that is not active
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session was stopped before provisioning finished
    #[error("Session {0} was stopped during provisioning")]
    StoppedDuringProvisioning(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Events(#[from] EventError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Why a single tool call failed
#[derive(Error, Debug)]
pub enum ToolInvocationError {
    #[error("Invalid tool name: {0:?}")]
    InvalidTool(String),

    #[error("Sandbox unreachable: {0}")]
    Unreachable(String),

    #[error("Tool call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Command timed out inside the sandbox")]
    CommandTimeout,

    #[error("Sandbox returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Sandbox returned a non-JSON response: {0}")]
    InvalidResponse(String),
}
