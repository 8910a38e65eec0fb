//! In-memory container runtime.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use nbdeploy_runtime::{
    ContainerFilter, ContainerRuntime, ContainerSpec, ContainerSummary, PortBinding, RuntimeError,
};
use tracing::debug;

/// A call made against [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List,
    Create(Option<String>),
    Start(String),
    Stop(String),
    Restart(String),
    Remove { id: String, force: bool },
    Pull(String),
    Build { tag: String, pull: bool },
}

#[derive(Debug, Default)]
struct RuntimeState {
    containers: Vec<ContainerSummary>,
    specs: Vec<(String, ContainerSpec)>,
    next_id: u64,
    calls: Vec<RuntimeCall>,
    failing_pulls: BTreeSet<String>,
}

/// A container runtime backed by a list of containers.
///
/// Containers can be addressed by ID or by name, as with Docker. Listing
/// applies [`ContainerFilter::matches`].
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

/// A listed container with one published port.
pub fn container(name: &str, label: &str, host_port: u16, state: &str) -> ContainerSummary {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(label.to_string(), String::new());
    ContainerSummary {
        id: format!("{name}-id"),
        names: vec![format!("/{name}")],
        image: label.to_string(),
        labels,
        state: state.to_string(),
        status: if state == "running" {
            "Up 5 minutes".to_string()
        } else {
            "Exited (0) 1 minute ago".to_string()
        },
        ports: vec![PortBinding {
            ip: Some("0.0.0.0".to_string()),
            private_port: 8080,
            public_port: Some(host_port),
            protocol: "tcp".to_string(),
        }],
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime already holding `containers`.
    pub fn with_containers(containers: Vec<ContainerSummary>) -> Self {
        let fake = Self::default();
        fake.lock().containers = containers;
        fake
    }

    /// Make pulls of `image` fail with a stream error.
    pub fn fail_pull(self, image: &str) -> Self {
        self.lock().failing_pulls.insert(image.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Every container, regardless of state.
    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.lock().containers.clone()
    }

    /// Container by name.
    pub fn get(&self, name: &str) -> Option<ContainerSummary> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.name() == Some(name))
            .cloned()
    }

    /// Spec a container was created from.
    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        let state = self.lock();
        let id = state
            .containers
            .iter()
            .find(|c| c.name() == Some(name))
            .map(|c| c.id.clone())?;
        state
            .specs
            .iter()
            .find(|(spec_id, _)| *spec_id == id)
            .map(|(_, spec)| spec.clone())
    }

    /// Names of running containers, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .containers
            .iter()
            .filter(|c| c.is_running())
            .filter_map(|c| c.name().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    fn set_state(&self, id: &str, running: bool) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let container = find_mut(&mut state.containers, id)?;
        if running {
            container.state = "running".to_string();
            container.status = "Up Less than a second".to_string();
        } else {
            container.state = "exited".to_string();
            container.status = "Exited (0) Less than a second ago".to_string();
        }
        Ok(())
    }
}

fn matches_ref(container: &ContainerSummary, reference: &str) -> bool {
    container.id == reference || container.name() == Some(reference)
}

fn find_mut<'a>(
    containers: &'a mut [ContainerSummary],
    reference: &str,
) -> Result<&'a mut ContainerSummary, RuntimeError> {
    containers
        .iter_mut()
        .find(|c| matches_ref(c, reference))
        .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::List);
        Ok(state
            .containers
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Create(spec.name.clone()));

        if let Some(name) = &spec.name {
            if state.containers.iter().any(|c| c.name() == Some(name.as_str())) {
                return Err(RuntimeError::Api {
                    status: 409,
                    message: format!("Conflict. The container name \"/{name}\" is already in use"),
                });
            }
        }
        for link in &spec.links {
            let target = link.split(':').next().unwrap_or_default();
            if !state.containers.iter().any(|c| matches_ref(c, target)) {
                return Err(RuntimeError::Api {
                    status: 400,
                    message: format!("could not get container for {target}"),
                });
            }
        }

        state.next_id += 1;
        let id = format!("{:012x}", state.next_id);
        let name = spec.name.clone().unwrap_or_else(|| format!("container_{}", state.next_id));
        let ports = spec
            .ports
            .iter()
            .map(|p| PortBinding {
                ip: Some("0.0.0.0".to_string()),
                private_port: p.container_port,
                public_port: Some(p.host_port),
                protocol: "tcp".to_string(),
            })
            .collect();

        state.containers.push(ContainerSummary {
            id: id.clone(),
            names: vec![format!("/{name}")],
            image: spec.image.clone(),
            labels: spec.labels.clone(),
            state: "created".to_string(),
            status: "Created".to_string(),
            ports,
        });
        state.specs.push((id.clone(), spec.clone()));
        debug!(id = %id, name = %name, "[FAKE] Created container");
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock().calls.push(RuntimeCall::Start(id.to_string()));
        self.set_state(id, true)
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock().calls.push(RuntimeCall::Stop(id.to_string()));
        self.set_state(id, false)
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock().calls.push(RuntimeCall::Restart(id.to_string()));
        self.set_state(id, true)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Remove {
            id: id.to_string(),
            force,
        });
        let index = state
            .containers
            .iter()
            .position(|c| matches_ref(c, id))
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if state.containers[index].is_running() && !force {
            return Err(RuntimeError::Api {
                status: 409,
                message: "You cannot remove a running container".to_string(),
            });
        }
        let removed = state.containers.remove(index);
        state.specs.retain(|(spec_id, _)| *spec_id != removed.id);
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Pull(image.to_string()));
        if state.failing_pulls.contains(image) {
            return Err(RuntimeError::Stream {
                operation: "pull",
                message: format!("manifest for {image} not found"),
            });
        }
        Ok(())
    }

    async fn build_image(&self, _context: &Path, tag: &str, pull: bool) -> Result<(), RuntimeError> {
        self.lock().calls.push(RuntimeCall::Build {
            tag: tag.to_string(),
            pull,
        });
        Ok(())
    }
}
