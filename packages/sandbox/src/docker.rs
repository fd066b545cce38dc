// ABOUTME: Docker implementation of the container runtime via bollard
// ABOUTME: Launches labelled sandbox containers with published ports and tears them down

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    models::{HostConfig, PortBinding},
    Docker,
};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, ManagedContainer,
    MANAGED_LABEL, SESSION_LABEL,
};

type Result<T> = std::result::Result<T, RuntimeError>;

/// Grace period before Docker escalates SIGTERM to SIGKILL
const STOP_TIMEOUT_SECS: i64 = 10;

/// Docker-backed [`ContainerRuntime`]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using the platform default socket or `DOCKER_HOST`
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    /// Verify the daemon answers
    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            RuntimeError::Connection(e.to_string())
        })?;
        Ok(())
    }

    /// Convert a sandbox spec into bollard's create config
    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();

        for port in &spec.ports {
            let container_port = format!("{}/tcp", port.container_port);
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![PortBinding {
                    host_ip: Some(port.host_ip.to_string()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|v| {
                format!(
                    "{}:{}:{}",
                    v.host_path,
                    v.container_path,
                    if v.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let env: Vec<String> = spec
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            binds: Some(binds),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn convert_state(state: &str) -> ContainerState {
        match state.to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" | "restarting" => ContainerState::Running,
            "exited" | "dead" | "removing" | "paused" => ContainerState::Stopped,
            other => ContainerState::Unknown(other.to_string()),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(classify(e)),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        info!("Creating sandbox container: {}", spec.name);

        if !self.image_exists(&spec.image).await? {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await
            .map_err(classify)?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            error!("Failed to start container {}: {}", container.id, e);
            // Leave no half-created container behind holding the name
            if let Err(cleanup) = self.remove(&container.id).await {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    container.id, cleanup
                );
            }
            return Err(classify(e));
        }

        info!("Started container {} ({})", spec.name, container.id);
        Ok(ContainerHandle {
            id: container.id,
            name: spec.name.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        info!("Stopping container: {}", handle.name);

        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self.client.stop_container(&handle.id, Some(options)).await {
            Ok(_) => {}
            // 304: already stopped, 404: already gone
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => debug!("Container {} already stopped", handle.id),
            Err(e) => return Err(classify(e)),
        }

        self.remove(&handle.id).await?;
        info!("Removed container: {}", handle.name);
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState> {
        let inspect = match self.client.inspect_container(&handle.id, None).await {
            Ok(inspect) => inspect,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerState::Missing),
            Err(e) => return Err(classify(e)),
        };

        let status = inspect
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| AsRef::<str>::as_ref(s).to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self::convert_state(&status))
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(classify)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                let session_id = c
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(SESSION_LABEL).cloned());
                let state = Self::convert_state(c.state.as_deref().unwrap_or("unknown"));
                Some(ManagedContainer {
                    handle: ContainerHandle { id, name },
                    session_id,
                    state,
                })
            })
            .collect())
    }
}

/// Map a bollard error onto the runtime error taxonomy
fn classify(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => {
            let lowered = message.to_lowercase();
            if lowered.contains("port is already allocated")
                || lowered.contains("address already in use")
            {
                RuntimeError::PortInUse(message)
            } else if status_code == 404 && lowered.contains("image") {
                RuntimeError::ImageNotFound(message)
            } else if status_code == 404 {
                RuntimeError::ContainerNotFound(message)
            } else {
                RuntimeError::Container(format!("{} (status {})", message, status_code))
            }
        }
        other => RuntimeError::Connection(other.to_string()),
    }
}
