// ABOUTME: In-memory container runtime for tests
// ABOUTME: Records launched specs and lets tests inject create failures

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::RuntimeError;
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, ManagedContainer,
    SESSION_LABEL,
};

type Result<T> = std::result::Result<T, RuntimeError>;

/// Fake [`ContainerRuntime`] that keeps containers in a map
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, (ContainerSpec, ContainerState)>>,
    next_failure: Mutex<Option<RuntimeError>>,
    created: AtomicUsize,
    stopped: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create` call fail with the given error
    pub fn fail_next_create(&self, err: RuntimeError) {
        *self.next_failure.lock().unwrap() = Some(err);
    }

    /// Pretend a container exists that no registry knows about
    pub fn insert_running(&self, spec: ContainerSpec) -> ContainerHandle {
        let id = format!("fake-{}", spec.name);
        let handle = ContainerHandle {
            id: id.clone(),
            name: spec.name.clone(),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(id, (spec, ContainerState::Running));
        handle
    }

    pub fn running(&self) -> usize {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter(|(_, state)| *state == ContainerState::Running)
            .count()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stopped_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Spec the container for `session_id` was launched with
    pub fn spec_for(&self, session_id: &str) -> Option<ContainerSpec> {
        self.containers
            .lock()
            .unwrap()
            .values()
            .find(|(spec, _)| {
                spec.labels.get(SESSION_LABEL).map(String::as_str) == Some(session_id)
            })
            .map(|(spec, _)| spec.clone())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        if let Some(err) = self.next_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert_running(spec.clone()))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        if self.containers.lock().unwrap().remove(&handle.id).is_some() {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(&handle.id)
            .map(|(_, state)| state.clone())
            .unwrap_or(ContainerState::Missing))
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (spec, state))| ManagedContainer {
                handle: ContainerHandle {
                    id: id.clone(),
                    name: spec.name.clone(),
                },
                session_id: spec.labels.get(SESSION_LABEL).cloned(),
                state: state.clone(),
            })
            .collect())
    }
}
