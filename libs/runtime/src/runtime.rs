//! Container runtime interface.

use std::path::Path;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::types::{ContainerFilter, ContainerSpec, ContainerSummary};

/// Operations the deployment tasks need from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers matching `filter`.
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Create a container; returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Pull `image` (`name[:tag]`, tag defaults to `latest`).
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Build `tag` from the directory at `context`.
    async fn build_image(&self, context: &Path, tag: &str, pull: bool) -> Result<(), RuntimeError>;

    /// Create and start a container; returns its ID.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let id = self.create_container(spec).await?;
        self.start_container(&id).await?;
        Ok(id)
    }
}
