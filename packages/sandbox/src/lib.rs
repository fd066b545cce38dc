// ABOUTME: Sandbox lifecycle management for Warden sessions
// ABOUTME: Port allocation, container runtime access, and session-to-sandbox bindings

pub mod docker;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod ports;
pub mod registry;
pub mod runtime;

// Re-export commonly used types
pub use docker::DockerRuntime;
pub use error::{ProvisioningError, Result, RuntimeError, SandboxError};
pub use ports::PortAllocator;
pub use registry::{PortRole, RegistryConfig, SandboxBinding, SandboxPorts, SandboxRegistry};
pub use runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, ManagedContainer,
    PortMapping, VolumeMount,
};
