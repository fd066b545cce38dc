// ABOUTME: Error types for sandbox provisioning and lifecycle operations
// ABOUTME: Separates caller-visible not-found from provisioning failures and runtime faults

use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// No active binding exists for the session
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Session already has an active sandbox binding
    #[error("Session already has an active sandbox: {0}")]
    AlreadyActive(String),

    /// Sandbox could not be provisioned for a create call
    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Container runtime failure outside of provisioning (stop, inspect, list)
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Why a sandbox could not be provisioned
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// Port search window exhausted
    #[error("No free port found within {window} probes starting at {start}")]
    ResourceExhausted { start: u16, window: u16 },

    /// Sandbox image is not present in the local image store
    #[error("Sandbox image {0} not found. Build or pull it first")]
    ImageMissing(String),

    /// A published port was taken between allocation and launch
    #[error("Port conflict while starting sandbox: {0}")]
    PortConflict(String),

    /// Container runtime could not be reached or refused the request
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Container was created but failed to start
    #[error("Container failed to start: {0}")]
    StartFailed(String),
}

impl ProvisioningError {
    /// Whether a fresh create call may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisioningError::PortConflict(_))
    }
}

/// Errors surfaced by a [`crate::ContainerRuntime`] implementation
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Port already allocated: {0}")]
    PortInUse(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container error: {0}")]
    Container(String),
}

impl From<RuntimeError> for ProvisioningError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Connection(msg) => ProvisioningError::RuntimeUnavailable(msg),
            RuntimeError::ImageNotFound(image) => ProvisioningError::ImageMissing(image),
            RuntimeError::PortInUse(msg) => ProvisioningError::PortConflict(msg),
            RuntimeError::ContainerNotFound(msg) | RuntimeError::Container(msg) => {
                ProvisioningError::StartFailed(msg)
            }
        }
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
