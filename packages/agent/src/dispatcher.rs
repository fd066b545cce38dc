// ABOUTME: Routes tool invocations to a session's sandbox HTTP service
// ABOUTME: Picks verb and path per tool, applies timeouts, and normalizes every outcome

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use warden_events::ToolResult;
use warden_sandbox::SandboxBinding;

use crate::error::{AgentError, Result, ToolInvocationError};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `timeout` parameter of `execute_command`, in seconds
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
/// Extra time given to the HTTP call over the command's own timeout
const COMMAND_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// HTTP verb and path a tool maps to on the sandbox service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

/// Route for a tool. Unlisted tools are posted to `/<tool>`.
pub fn route_for(tool: &str) -> Route {
    let (method, path) = match tool {
        "list_files" => (Method::GET, "/files/list"),
        "read_file" => (Method::GET, "/files/read"),
        "write_file" => (Method::POST, "/files/write"),
        "delete_file" => (Method::DELETE, "/files/delete"),
        "execute_command" => (Method::POST, "/shell/execute"),
        "browser_goto" => (Method::POST, "/browser/goto"),
        "browser_screenshot" => (Method::GET, "/browser/screenshot"),
        "browser_click" => (Method::POST, "/browser/click"),
        "browser_type" => (Method::POST, "/browser/type"),
        other => {
            return Route {
                method: Method::POST,
                path: format!("/{}", other),
            }
        }
    };
    Route {
        method,
        path: path.to_string(),
    }
}

/// Unlisted names become URL paths, so only names that stay inside the
/// sandbox API root and form a single clean path are accepted
fn is_valid_tool_name(tool: &str) -> bool {
    !tool.split('/').any(|segment| matches!(segment, "" | "." | ".."))
        && !tool.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '?' | '#' | '\\' | '%')
        })
}

/// Flatten a params object into query pairs; strings are passed unquoted
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    match params {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub struct ToolDispatcher {
    client: Client,
    default_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("warden")
            .build()
            .map_err(|e| AgentError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            default_timeout,
        })
    }

    /// Time allowed for one call of `tool`
    pub fn timeout_for(&self, tool: &str, params: &Value) -> Duration {
        if tool == "execute_command" {
            let secs = params
                .get("timeout")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
            Duration::from_secs(secs) + COMMAND_TIMEOUT_GRACE
        } else {
            self.default_timeout
        }
    }

    /// Execute a tool against the session's sandbox. Failures come back as error results.
    pub async fn invoke(&self, binding: &SandboxBinding, tool: &str, params: &Value) -> ToolResult {
        match self.call(binding, tool, params).await {
            Ok(data) => ToolResult::ok(data),
            Err(e) => {
                warn!(
                    session_id = %binding.session_id,
                    tool = %tool,
                    error = %e,
                    "Tool invocation failed"
                );
                ToolResult::error(e.to_string())
            }
        }
    }

    async fn call(
        &self,
        binding: &SandboxBinding,
        tool: &str,
        params: &Value,
    ) -> std::result::Result<Value, ToolInvocationError> {
        if !is_valid_tool_name(tool) {
            return Err(ToolInvocationError::InvalidTool(tool.to_string()));
        }

        let route = route_for(tool);
        let url = format!("{}{}", binding.base_url, route.path);
        let timeout = self.timeout_for(tool, params);

        debug!(
            session_id = %binding.session_id,
            tool = %tool,
            method = %route.method,
            url = %url,
            "Dispatching tool call"
        );

        let request = self.client.request(route.method.clone(), &url).timeout(timeout);
        let request = if route.method == Method::POST {
            request.json(params)
        } else {
            request.query(&query_pairs(params))
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolInvocationError::Timeout(timeout)
            } else {
                ToolInvocationError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::REQUEST_TIMEOUT {
            return Err(ToolInvocationError::CommandTimeout);
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ToolInvocationError::Timeout(timeout)
            } else {
                ToolInvocationError::Unreachable(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(ToolInvocationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ToolInvocationError::InvalidResponse(e.to_string()))
    }

    /// Whether the sandbox service answers its health check
    pub async fn health(&self, binding: &SandboxBinding) -> bool {
        let url = format!("{}/health", binding.base_url);
        match self
            .client
            .get(&url)
            .timeout(self.default_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(session_id = %binding.session_id, error = %e, "Sandbox health check failed");
                false
            }
        }
    }
}
