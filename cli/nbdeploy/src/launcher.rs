//! Starting service instances and their support containers.

use std::collections::BTreeSet;

use nbdeploy_runtime::{
    env_file, ContainerFilter, ContainerRuntime, ContainerSpec, RestartPolicy, RuntimeError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{LogForwarderSettings, ServiceSettings, SidecarSettings, StatuspageSettings};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("no free port at or above {0}")]
    NoFreePort(u16),
}

/// A started instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Launched {
    pub id: String,
    pub name: String,
    pub port: u16,
}

/// Make sure a container carrying `label` is running.
///
/// A running one is reused; a stopped one is started again; otherwise
/// `spec` is created and started. Returns the container ID.
pub async fn ensure_labeled(
    runtime: &dyn ContainerRuntime,
    label: &str,
    spec: &ContainerSpec,
) -> Result<String, RuntimeError> {
    let existing = runtime
        .list_containers(&ContainerFilter::label(label).all())
        .await?;

    if let Some(running) = existing.iter().find(|c| c.is_running()) {
        info!(label = label, id = %running.short_id(), "Container already running");
        return Ok(running.id.clone());
    }
    if let Some(stopped) = existing.first() {
        info!(label = label, id = %stopped.short_id(), "Starting stopped container");
        runtime.start_container(&stopped.id).await?;
        return Ok(stopped.id.clone());
    }

    info!(label = label, image = %spec.image, "Starting container");
    runtime.run_container(spec).await
}

/// Port scan starting at `base`, skipping `in_use`.
pub fn first_free_port(base: u16, in_use: &BTreeSet<u16>) -> Option<u16> {
    (base..=u16::MAX).find(|port| !in_use.contains(port))
}

/// Launches service instances on one host.
pub struct Launcher<'a> {
    runtime: &'a dyn ContainerRuntime,
    service: &'a ServiceSettings,
    sidecar: &'a SidecarSettings,
}

impl<'a> Launcher<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        service: &'a ServiceSettings,
        sidecar: &'a SidecarSettings,
    ) -> Self {
        Self {
            runtime,
            service,
            sidecar,
        }
    }

    /// Start the cache sidecar unless it is already running.
    pub async fn ensure_sidecar(&self) -> Result<String, RuntimeError> {
        let spec = ContainerSpec::new(&self.sidecar.image)
            .name(&self.sidecar.name)
            .label(&self.sidecar.label)
            .restart(RestartPolicy::Always);
        ensure_labeled(self.runtime, &self.sidecar.label, &spec).await
    }

    /// Public ports of running service containers.
    pub async fn ports_in_use(&self) -> Result<BTreeSet<u16>, RuntimeError> {
        let running = self
            .runtime
            .list_containers(&ContainerFilter::label(&self.service.label))
            .await?;
        Ok(running
            .iter()
            .flat_map(|c| c.published().map(|(_, port)| port))
            .collect())
    }

    /// Lowest free port at or above the base port.
    pub async fn allocate_port(&self) -> Result<u16, LaunchError> {
        let in_use = self.ports_in_use().await?;
        first_free_port(self.service.base_port, &in_use)
            .ok_or(LaunchError::NoFreePort(self.service.base_port))
    }

    /// Container name for an instance on `port`.
    pub fn instance_name(&self, port: u16) -> String {
        format!("{}-{}", self.service.name_prefix, port)
    }

    /// Create spec for one instance.
    pub fn instance_spec(
        &self,
        image: &str,
        port: u16,
        sidecar_id: &str,
        env: Vec<String>,
    ) -> ContainerSpec {
        ContainerSpec::new(image)
            .name(self.instance_name(port))
            .env(env)
            .label(&self.service.label)
            .restart(RestartPolicy::Always)
            .link(sidecar_id, &self.sidecar.alias)
            .publish(port, self.service.container_port)
            .cmd(self.service.command.iter().cloned())
    }

    /// Start one instance; an explicit port wins over allocation.
    pub async fn launch(
        &self,
        port: Option<u16>,
        image: Option<&str>,
    ) -> Result<Launched, LaunchError> {
        let sidecar_id = self.ensure_sidecar().await?;
        let port = match port {
            Some(port) => port,
            None => self.allocate_port().await?,
        };
        let env = env_file::load(&self.service.env_file).await?;
        let image = image.unwrap_or(&self.service.image);

        let spec = self.instance_spec(image, port, &sidecar_id, env);
        let name = self.instance_name(port);
        info!(name = %name, image = image, port, "Launching instance");
        let id = self.runtime.run_container(&spec).await?;

        Ok(Launched { id, name, port })
    }
}

/// Start the log forwarder unless it is already running.
pub async fn ensure_log_forwarder(
    runtime: &dyn ContainerRuntime,
    settings: &LogForwarderSettings,
    token: &str,
    host_name: &str,
) -> Result<String, RuntimeError> {
    let spec = ContainerSpec::new(&settings.image)
        .name(&settings.name)
        .label(&settings.label)
        .restart(RestartPolicy::Always)
        .bind(format!("{0}:{0}", settings.docker_socket))
        .cmd([
            "-t".to_string(),
            token.to_string(),
            "--no-stats".to_string(),
            "-j".to_string(),
            "-a".to_string(),
            format!("host={host_name}"),
        ]);
    ensure_labeled(runtime, &settings.label, &spec).await
}

/// Rebuild the status page image and replace its container.
pub async fn run_statuspage(
    runtime: &dyn ContainerRuntime,
    settings: &StatuspageSettings,
) -> Result<String, RuntimeError> {
    info!(tag = %settings.tag, context = %settings.build_context.display(), "Building status page");
    runtime.build_image(&settings.build_context, &settings.tag, true).await?;

    let existing = runtime
        .list_containers(&ContainerFilter::named(&settings.name))
        .await?;
    for container in existing.iter().filter(|c| c.name() == Some(settings.name.as_str())) {
        info!(id = %container.short_id(), "Removing old status page");
        runtime.remove_container(&container.id, true).await?;
    }

    let mut env = Vec::new();
    for path in &settings.env_files {
        env.extend(env_file::load(path).await?);
    }
    let spec = ContainerSpec::new(&settings.tag)
        .name(&settings.name)
        .env(env)
        .restart(RestartPolicy::Always)
        .tty(true);
    runtime.run_container(&spec).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_free_port() {
        let in_use: BTreeSet<u16> = [8080, 8081, 8083].into_iter().collect();
        assert_eq!(first_free_port(8080, &in_use), Some(8082));
        assert_eq!(first_free_port(8084, &in_use), Some(8084));
        let full: BTreeSet<u16> = [u16::MAX].into_iter().collect();
        assert_eq!(first_free_port(u16::MAX, &full), None);
    }

    #[test]
    fn test_instance_spec() {
        let service = ServiceSettings::default();
        let sidecar = SidecarSettings::default();
        let runtime = nbdeploy_testing::FakeRuntime::new();
        let launcher = Launcher::new(&runtime, &service, &sidecar);

        let spec = launcher.instance_spec("nbviewer", 8082, "abc", vec!["A=1".to_string()]);
        assert_eq!(spec.name.as_deref(), Some("nbviewer-8082"));
        assert_eq!(spec.links, vec!["abc:nbcache".to_string()]);
        assert_eq!(spec.ports[0].host_port, 8082);
        assert_eq!(spec.ports[0].container_port, 8080);
        assert_eq!(spec.restart_policy, RestartPolicy::Always);
        assert!(spec.labels.contains_key("nbviewer"));
        assert_eq!(spec.env, vec!["A=1".to_string()]);
        assert_eq!(spec.cmd[0], "newrelic-admin");
    }
}
