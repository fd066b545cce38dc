// ABOUTME: Pluggable decision step that turns session history into tool calls
// ABOUTME: Ships a keyword planner as the default stand-in for a model-backed planner

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use warden_events::{Event, EventPayload};

/// One tool call chosen by a decision step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// What to do in response to the latest message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Executed in order
    pub invocations: Vec<ToolInvocation>,
    /// Text to log back to the user after the calls
    pub reply: Option<String>,
}

#[async_trait]
pub trait DecisionStep: Send + Sync {
    async fn decide(&self, history: &[Event]) -> Plan;
}

/// Chooses at most one tool by looking for keywords in the latest user message
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordPlanner;

fn latest_user_message(history: &[Event]) -> Option<&str> {
    history.iter().rev().find_map(|event| match &event.payload {
        EventPayload::UserMessage { content } => Some(content.as_str()),
        _ => None,
    })
}

#[async_trait]
impl DecisionStep for KeywordPlanner {
    async fn decide(&self, history: &[Event]) -> Plan {
        let Some(message) = latest_user_message(history) else {
            return Plan::default();
        };
        let lowered = message.to_lowercase();

        let invocation = if lowered.contains("search") {
            Some(ToolInvocation::new("search", json!({ "query": message })))
        } else if lowered.contains("list files") {
            Some(ToolInvocation::new("list_files", json!({ "path": "." })))
        } else if lowered.contains("browser") {
            Some(ToolInvocation::new(
                "browser_goto",
                json!({ "url": "https://www.google.com" }),
            ))
        } else {
            None
        };

        match invocation {
            Some(invocation) => Plan {
                invocations: vec![invocation],
                reply: None,
            },
            None => Plan {
                invocations: Vec::new(),
                reply: Some(format!(
                    "Received: {}. No tool matched this request.",
                    message
                )),
            },
        }
    }
}
