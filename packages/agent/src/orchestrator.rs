// ABOUTME: Session lifecycle and message processing across sandbox, planner and event hub
// ABOUTME: Each session processes messages one at a time in arrival order; sessions run concurrently

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use warden_events::{EventHub, EventPayload, EventStream};
use warden_sandbox::{SandboxPorts, SandboxRegistry};

use crate::dispatcher::ToolDispatcher;
use crate::error::{AgentError, Result};
use crate::planner::DecisionStep;

pub const THINKING_MESSAGE: &str = "Thinking about the task...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Provisioning,
    Active,
    Stopping,
    Stopped,
}

/// Snapshot of a session for callers
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub state: SessionState,
    pub ports: Option<SandboxPorts>,
    pub created_at: DateTime<Utc>,
}

struct SessionEntry {
    user_id: String,
    state: SessionState,
    created_at: DateTime<Utc>,
    /// Feeds the session's message worker, started on the first message
    inbox: Option<mpsc::UnboundedSender<String>>,
}

pub struct SessionOrchestrator {
    registry: Arc<SandboxRegistry>,
    hub: Arc<EventHub>,
    dispatcher: Arc<ToolDispatcher>,
    planner: Arc<dyn DecisionStep>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionOrchestrator {
    pub fn new(
        registry: Arc<SandboxRegistry>,
        hub: Arc<EventHub>,
        dispatcher: Arc<ToolDispatcher>,
        planner: Arc<dyn DecisionStep>,
    ) -> Self {
        Self {
            registry,
            hub,
            dispatcher,
            planner,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    /// Provision a sandbox for a new session and make it active
    pub async fn create_session(&self, user_id: &str) -> Result<SessionInfo> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();

        self.sessions.write().await.insert(
            session_id.clone(),
            SessionEntry {
                user_id: user_id.to_string(),
                state: SessionState::Provisioning,
                created_at,
                inbox: None,
            },
        );

        let binding = match self.registry.create(Some(session_id.clone())).await {
            Ok((_, binding)) => binding,
            Err(e) => {
                self.sessions.write().await.remove(&session_id);
                error!(session_id = %session_id, error = %e, "Failed to provision sandbox");
                return Err(e.into());
            }
        };

        if let Err(e) = self.hub.reset(&session_id).await {
            error!(session_id = %session_id, error = %e, "Failed to reset event history");
            self.abandon(&session_id).await;
            return Err(e.into());
        }

        let activated = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&session_id) {
                Some(entry) if entry.state == SessionState::Provisioning => {
                    entry.state = SessionState::Active;
                    true
                }
                _ => false,
            }
        };
        if !activated {
            info!(session_id = %session_id, "Session stopped while provisioning");
            self.abandon(&session_id).await;
            return Err(AgentError::StoppedDuringProvisioning(session_id));
        }

        info!(
            session_id = %session_id,
            user_id = %user_id,
            api_port = binding.ports.api,
            "Session created"
        );

        Ok(SessionInfo {
            session_id,
            user_id: user_id.to_string(),
            state: SessionState::Active,
            ports: Some(binding.ports),
            created_at,
        })
    }

    async fn abandon(&self, session_id: &str) {
        if let Err(e) = self.registry.stop(session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to stop sandbox of abandoned session");
        }
        self.hub.close(session_id).await;
        self.sessions.write().await.remove(session_id);
    }

    /// Queue a user message for processing and return immediately
    pub async fn send_message(self: &Arc<Self>, session_id: &str, text: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = match sessions.get_mut(session_id) {
            Some(entry) if entry.state == SessionState::Active => entry,
            _ => return Err(AgentError::SessionNotFound(session_id.to_string())),
        };

        let inbox = entry
            .inbox
            .get_or_insert_with(|| self.spawn_worker(session_id));
        inbox
            .send(text.to_string())
            .map_err(|_| AgentError::SessionNotFound(session_id.to_string()))
    }

    fn spawn_worker(self: &Arc<Self>, session_id: &str) -> mpsc::UnboundedSender<String> {
        let (inbox, mut messages) = mpsc::unbounded_channel::<String>();
        let orchestrator = Arc::clone(self);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            while let Some(text) = messages.recv().await {
                if orchestrator.ensure_active(&session_id).await.is_err() {
                    break;
                }
                orchestrator.handle_message(&session_id, &text).await;
            }
            debug!(session_id = %session_id, "Message worker finished");
        });

        inbox
    }

    /// Run one turn; errors and panics become an error-level agent_log
    async fn handle_message(&self, session_id: &str, text: &str) {
        let outcome = AssertUnwindSafe(self.process_message(session_id, text))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(&*panic),
        };

        error!(session_id = %session_id, error = %failure, "Message processing failed");
        let notice = EventPayload::agent_error(format!("Error processing message: {}", failure));
        if let Err(e) = self.hub.record(session_id, notice).await {
            error!(session_id = %session_id, error = %e, "Failed to record processing error");
        }
    }

    async fn process_message(&self, session_id: &str, text: &str) -> Result<()> {
        self.hub
            .record(session_id, EventPayload::user_message(text))
            .await?;
        self.hub
            .record(session_id, EventPayload::agent_log(THINKING_MESSAGE))
            .await?;

        let history = self.hub.replay(session_id).await?;
        let plan = self.planner.decide(&history).await;

        for invocation in plan.invocations {
            let binding = self.registry.get(session_id).await?;

            self.hub
                .record(
                    session_id,
                    EventPayload::agent_log(format!(
                        "Calling tool: {} with {}",
                        invocation.tool, invocation.params
                    )),
                )
                .await?;

            let result = self
                .dispatcher
                .invoke(&binding, &invocation.tool, &invocation.params)
                .await;

            self.hub
                .record(
                    session_id,
                    EventPayload::tool_result(invocation.tool, invocation.params, result),
                )
                .await?;
        }

        if let Some(reply) = plan.reply {
            self.hub
                .record(session_id, EventPayload::agent_log(reply))
                .await?;
        }

        Ok(())
    }

    /// Tear a session down. Unknown or already stopped sessions are a no-op.
    pub async fn stop_session(&self, session_id: &str) {
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(session_id) {
                Some(entry) if entry.state == SessionState::Active => {
                    entry.state = SessionState::Stopping;
                }
                Some(entry) if entry.state == SessionState::Provisioning => {
                    // create_session sees this and tears the sandbox down itself
                    entry.state = SessionState::Stopping;
                    return;
                }
                _ => return,
            }
        }

        if let Err(e) = self.registry.stop(session_id).await {
            warn!(session_id = %session_id, error = %e, "Sandbox stop failed");
        }
        self.hub.close(session_id).await;
        self.sessions.write().await.remove(session_id);

        info!(session_id = %session_id, "Session stopped");
    }

    /// History followed by live events for an active session
    pub async fn events(&self, session_id: &str) -> Result<EventStream> {
        self.ensure_active(session_id).await?;
        Ok(self.hub.stream(session_id).await?)
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionInfo> {
        let (user_id, state, created_at) = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
            (entry.user_id.clone(), entry.state, entry.created_at)
        };

        let ports = self.registry.get(session_id).await.ok().map(|b| b.ports);

        Ok(SessionInfo {
            session_id: session_id.to_string(),
            user_id,
            state,
            ports,
            created_at,
        })
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        info!("Stopping {} sessions", ids.len());
        for session_id in ids {
            self.stop_session(&session_id).await;
        }
        self.registry.stop_all().await;
    }

    async fn ensure_active(&self, session_id: &str) -> Result<()> {
        match self.sessions.read().await.get(session_id) {
            Some(entry) if entry.state == SessionState::Active => Ok(()),
            _ => Err(AgentError::SessionNotFound(session_id.to_string())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unexpected panic".to_string())
}
