// ABOUTME: Warden server bootstrap: wires sandbox registry, event hub and orchestrator
// ABOUTME: Serves the HTTP API until a shutdown signal, then tears sessions down

pub mod config;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use warden_agent::{KeywordPlanner, SessionOrchestrator, ToolDispatcher};
use warden_api::{create_router, AppState, AuthConfig};
use warden_events::{EventBus, EventHub, SqliteEventLog};
use warden_sandbox::{DockerRuntime, PortAllocator, RegistryConfig, SandboxRegistry};

pub use config::{Config, ConfigError};

/// Build every service from config and serve until interrupted
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let runtime = DockerRuntime::new().context("Failed to initialize Docker client")?;
    if let Err(e) = runtime.ping().await {
        warn!(error = %e, "Docker daemon is not reachable; session creation will fail until it is");
    }

    let registry = Arc::new(SandboxRegistry::new(
        Arc::new(runtime),
        PortAllocator::new(config.sandbox_host),
        RegistryConfig {
            image: config.sandbox_image.clone(),
            sandbox_host: config.sandbox_host,
            workspace_dir: config.workspace_dir.clone(),
            mount_docker_socket: config.mount_docker_socket,
        },
    ));

    match registry.reap_orphans().await {
        Ok(reaped) if !reaped.is_empty() => {
            info!("Removed {} sandboxes left by a previous run", reaped.len())
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not check for orphaned sandboxes"),
    }

    let log = SqliteEventLog::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open event log at {}", config.database_url))?;
    let hub = Arc::new(EventHub::new(
        Arc::new(log),
        EventBus::new(config.event_buffer),
    ));

    let dispatcher = Arc::new(ToolDispatcher::new(config.tool_timeout)?);
    let orchestrator = Arc::new(SessionOrchestrator::new(
        registry,
        hub,
        dispatcher,
        Arc::new(KeywordPlanner),
    ));

    let app = create_router(AppState::new(
        orchestrator.clone(),
        AuthConfig::new(config.api_token.clone()),
    ));

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Warden listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down, stopping active sessions");
    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
