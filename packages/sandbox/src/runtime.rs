// ABOUTME: Container runtime abstraction used by the sandbox registry
// ABOUTME: Narrow create/stop/inspect/list interface so the registry can run against a fake

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::RuntimeError;

/// Label marking containers created by this service
pub const MANAGED_LABEL: &str = "warden.managed";
/// Label carrying the owning session id
pub const SESSION_LABEL: &str = "warden.session_id";

type Result<T> = std::result::Result<T, RuntimeError>;

/// Everything needed to launch one sandbox container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env_vars: HashMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Host address the port is published on
    pub host_ip: IpAddr,
    pub host_port: u16,
    pub container_port: u16,
}

/// Reference to a running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Coarse container state as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
    Missing,
    Unknown(String),
}

/// A labelled container found on the runtime
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub handle: ContainerHandle,
    pub session_id: Option<String>,
    pub state: ContainerState,
}

/// Container runtime backing the sandbox registry
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container; returns once it is running
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Stop and remove a container. Already stopped or removed is not an error.
    async fn stop(&self, handle: &ContainerHandle) -> Result<()>;

    /// Report the current state of a container
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState>;

    /// List containers carrying [`MANAGED_LABEL`], including stopped ones
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>>;
}
