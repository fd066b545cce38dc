// ABOUTME: Event data model shared by the log, the bus and the HTTP stream
// ABOUTME: Events serialize flat with a `type` tag, matching the SSE wire format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds as stored in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    AgentLog,
    ToolResult,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UserMessage => "user_message",
            EventKind::AgentLog => "agent_log",
            EventKind::ToolResult => "tool_result",
        }
    }
}

/// Severity of an agent log line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Error,
}

/// Normalized outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    Ok { data: Value },
    Error { message: String },
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        ToolResult::Ok { data }
    }

    /// Error result; an empty message is replaced so callers always get text
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message
        };
        ToolResult::Error { message }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok { .. })
    }
}

/// Kind-specific event content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    UserMessage {
        content: String,
    },
    AgentLog {
        #[serde(default)]
        level: LogLevel,
        content: String,
    },
    ToolResult {
        tool: String,
        #[serde(default)]
        params: Value,
        result: ToolResult,
    },
}

impl EventPayload {
    pub fn user_message(content: impl Into<String>) -> Self {
        EventPayload::UserMessage {
            content: content.into(),
        }
    }

    pub fn agent_log(content: impl Into<String>) -> Self {
        EventPayload::AgentLog {
            level: LogLevel::Info,
            content: content.into(),
        }
    }

    pub fn agent_error(content: impl Into<String>) -> Self {
        EventPayload::AgentLog {
            level: LogLevel::Error,
            content: content.into(),
        }
    }

    pub fn tool_result(tool: impl Into<String>, params: Value, result: ToolResult) -> Self {
        EventPayload::ToolResult {
            tool: tool.into(),
            params,
            result,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::UserMessage { .. } => EventKind::UserMessage,
            EventPayload::AgentLog { .. } => EventKind::AgentLog,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
        }
    }
}

/// An appended, immutable session event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position within the session, starting at 1
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_event_wire_shape() {
        let event = Event {
            seq: 3,
            timestamp: Utc::now(),
            payload: EventPayload::tool_result(
                "list_files",
                json!({"path": "."}),
                ToolResult::ok(json!([{"name": "a.txt"}])),
            ),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["seq"], 3);
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["tool"], "list_files");
        assert_eq!(value["result"]["status"], "ok");
        assert_eq!(value["result"]["data"][0]["name"], "a.txt");
    }

    #[test]
    fn test_agent_log_defaults_to_info_level() {
        let payload: EventPayload =
            serde_json::from_value(json!({"type": "agent_log", "content": "hi"})).unwrap();
        assert_eq!(payload, EventPayload::agent_log("hi"));
    }

    #[test]
    fn test_error_result_never_has_empty_message() {
        let result = ToolResult::error("  ");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "unknown error");
        assert!(!result.is_ok());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = Event {
            seq: 1,
            timestamp: Utc::now(),
            payload: EventPayload::user_message("list files"),
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind().as_str(), "user_message");
    }
}
