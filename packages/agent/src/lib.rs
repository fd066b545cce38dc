// ABOUTME: Agent side of Warden: session orchestration, decision steps and tool dispatch
// ABOUTME: Ties sandbox bindings and the event hub together per session

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod planner;

pub use dispatcher::{route_for, Route, ToolDispatcher, DEFAULT_TOOL_TIMEOUT};
pub use error::{AgentError, Result, ToolInvocationError};
pub use orchestrator::{SessionInfo, SessionOrchestrator, SessionState, THINKING_MESSAGE};
pub use planner::{DecisionStep, KeywordPlanner, Plan, ToolInvocation};
