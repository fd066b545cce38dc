// ABOUTME: Sandbox registry mapping sessions to their container and published ports
// ABOUTME: Owns sandbox creation and teardown; never holds its map lock across runtime calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{ProvisioningError, Result, SandboxError};
use crate::ports::PortAllocator;
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, PortMapping, VolumeMount,
    SESSION_LABEL,
};

/// Logical service ports exposed by every sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    Api,
    Vnc,
    Novnc,
    Cdp,
}

impl PortRole {
    pub const ALL: [PortRole; 4] = [PortRole::Api, PortRole::Vnc, PortRole::Novnc, PortRole::Cdp];

    /// Port the service listens on inside the container, also the host search start
    pub fn container_port(self) -> u16 {
        match self {
            PortRole::Api => 8080,
            PortRole::Vnc => 5900,
            PortRole::Novnc => 6080,
            PortRole::Cdp => 9222,
        }
    }

    fn env_var(self) -> &'static str {
        match self {
            PortRole::Api => "API_PORT",
            PortRole::Vnc => "VNC_PORT",
            PortRole::Novnc => "NOVNC_PORT",
            PortRole::Cdp => "CDP_PORT",
        }
    }
}

/// Host ports allocated to one sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPorts {
    pub api: u16,
    pub vnc: u16,
    pub novnc: u16,
    pub cdp: u16,
}

impl SandboxPorts {
    pub fn get(&self, role: PortRole) -> u16 {
        match role {
            PortRole::Api => self.api,
            PortRole::Vnc => self.vnc,
            PortRole::Novnc => self.novnc,
            PortRole::Cdp => self.cdp,
        }
    }

    pub fn to_vec(&self) -> Vec<u16> {
        PortRole::ALL.iter().map(|&role| self.get(role)).collect()
    }
}

/// A session's live sandbox: container handle plus where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxBinding {
    pub session_id: String,
    pub container: ContainerHandle,
    /// Base URL of the sandbox's `api` service, without trailing slash
    pub base_url: String,
    pub ports: SandboxPorts,
    pub created_at: DateTime<Utc>,
}

/// Static settings for sandbox containers
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub image: String,
    /// Address the sandbox ports are published on and reached at
    pub sandbox_host: IpAddr,
    /// Mounted read-write at `/app` inside every sandbox
    pub workspace_dir: PathBuf,
    pub mount_docker_socket: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            image: "warden-sandbox:latest".to_string(),
            sandbox_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            mount_docker_socket: false,
        }
    }
}

enum Slot {
    Provisioning,
    Active(SandboxBinding),
}

/// Authoritative session → sandbox binding map
pub struct SandboxRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    allocator: PortAllocator,
    config: RegistryConfig,
    slots: RwLock<HashMap<String, Slot>>,
}

impl SandboxRegistry {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        allocator: PortAllocator,
        config: RegistryConfig,
    ) -> Self {
        Self {
            runtime,
            allocator,
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Provision a sandbox for a session, generating the session id if absent
    pub async fn create(&self, session_id: Option<String>) -> Result<(String, SandboxBinding)> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        {
            let mut slots = self.slots.write().await;
            if slots.contains_key(&session_id) {
                return Err(SandboxError::AlreadyActive(session_id));
            }
            slots.insert(session_id.clone(), Slot::Provisioning);
        }

        match self.provision(&session_id).await {
            Ok(binding) => {
                self.slots
                    .write()
                    .await
                    .insert(session_id.clone(), Slot::Active(binding.clone()));
                info!(
                    session_id = %session_id,
                    container = %binding.container.name,
                    api_port = binding.ports.api,
                    "Sandbox provisioned"
                );
                Ok((session_id, binding))
            }
            Err(e) => {
                self.slots.write().await.remove(&session_id);
                error!(session_id = %session_id, error = %e, "Sandbox provisioning failed");
                Err(SandboxError::Provisioning(e))
            }
        }
    }

    async fn provision(
        &self,
        session_id: &str,
    ) -> std::result::Result<SandboxBinding, ProvisioningError> {
        let ports = self.allocate_ports()?;
        let spec = self.container_spec(session_id, &ports);

        match self.runtime.create(&spec).await {
            Ok(container) => Ok(SandboxBinding {
                session_id: session_id.to_string(),
                container,
                base_url: format!(
                    "http://{}",
                    SocketAddr::new(self.config.sandbox_host, ports.api)
                ),
                ports,
                created_at: Utc::now(),
            }),
            Err(e) => {
                self.allocator.release(&ports.to_vec());
                Err(e.into())
            }
        }
    }

    fn allocate_ports(&self) -> std::result::Result<SandboxPorts, ProvisioningError> {
        let mut taken = Vec::with_capacity(PortRole::ALL.len());
        for role in PortRole::ALL {
            match self.allocator.allocate(role.container_port(), 1) {
                Ok(mut ports) => taken.append(&mut ports),
                Err(e) => {
                    self.allocator.release(&taken);
                    return Err(e);
                }
            }
        }

        Ok(SandboxPorts {
            api: taken[0],
            vnc: taken[1],
            novnc: taken[2],
            cdp: taken[3],
        })
    }

    fn container_spec(&self, session_id: &str, ports: &SandboxPorts) -> ContainerSpec {
        let mut volumes = vec![VolumeMount {
            host_path: self.config.workspace_dir.to_string_lossy().to_string(),
            container_path: "/app".to_string(),
            readonly: false,
        }];
        if self.config.mount_docker_socket {
            volumes.push(VolumeMount {
                host_path: "/var/run/docker.sock".to_string(),
                container_path: "/var/run/docker.sock".to_string(),
                readonly: false,
            });
        }

        ContainerSpec {
            image: self.config.image.clone(),
            name: format!("sandbox-{}", session_id),
            env_vars: PortRole::ALL
                .iter()
                .map(|&role| (role.env_var().to_string(), ports.get(role).to_string()))
                .collect(),
            volumes,
            ports: PortRole::ALL
                .iter()
                .map(|&role| PortMapping {
                    host_ip: self.config.sandbox_host,
                    host_port: ports.get(role),
                    container_port: role.container_port(),
                })
                .collect(),
            labels: HashMap::from([(SESSION_LABEL.to_string(), session_id.to_string())]),
        }
    }

    /// Look up the active binding for a session
    pub async fn get(&self, session_id: &str) -> Result<SandboxBinding> {
        match self.slots.read().await.get(session_id) {
            Some(Slot::Active(binding)) => Ok(binding.clone()),
            _ => Err(SandboxError::NotFound(session_id.to_string())),
        }
    }

    /// Stop and remove a session's sandbox. Unknown or already stopped sessions are a no-op.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let binding = {
            let mut slots = self.slots.write().await;
            match slots.remove(session_id) {
                Some(Slot::Active(binding)) => binding,
                Some(Slot::Provisioning) => {
                    // The create call owns this slot until it settles
                    slots.insert(session_id.to_string(), Slot::Provisioning);
                    debug!(session_id = %session_id, "Stop requested while provisioning");
                    return Ok(());
                }
                None => {
                    debug!(session_id = %session_id, "Stop for unknown session ignored");
                    return Ok(());
                }
            }
        };

        let result = self.runtime.stop(&binding.container).await;
        self.allocator.release(&binding.ports.to_vec());

        match result {
            Ok(()) => {
                info!(session_id = %session_id, "Sandbox stopped");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Sandbox stop failed");
                Err(SandboxError::Runtime(e))
            }
        }
    }

    /// Current container state for a session's sandbox
    pub async fn inspect(&self, session_id: &str) -> Result<ContainerState> {
        let binding = self.get(session_id).await?;
        Ok(self.runtime.inspect(&binding.container).await?)
    }

    /// Session ids with an active binding
    pub async fn active_sessions(&self) -> Vec<String> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove labelled containers that no live binding owns, e.g. left by a previous process
    pub async fn reap_orphans(&self) -> Result<Vec<String>> {
        let containers = self.runtime.list_managed().await?;
        let known: Vec<String> = self.slots.read().await.keys().cloned().collect();

        let mut reaped = Vec::new();
        for container in containers {
            let owned = container
                .session_id
                .as_ref()
                .map(|id| known.contains(id))
                .unwrap_or(false);
            if owned {
                continue;
            }

            match self.runtime.stop(&container.handle).await {
                Ok(()) => {
                    info!(container = %container.handle.name, "Reaped orphaned sandbox");
                    reaped.push(container.handle.id);
                }
                Err(e) => warn!(
                    container = %container.handle.name,
                    error = %e,
                    "Failed to reap orphaned sandbox"
                ),
            }
        }
        Ok(reaped)
    }

    /// Stop every active sandbox, logging failures
    pub async fn stop_all(&self) {
        for session_id in self.active_sessions().await {
            if let Err(e) = self.stop(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to stop sandbox during shutdown");
            }
        }
    }
}
