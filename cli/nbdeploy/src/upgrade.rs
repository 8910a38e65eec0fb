//! Rolling replacement of service instances.
//!
//! Instances are replaced one at a time. Each one moves through
//!
//! ```text
//! RUNNING -> STOPPING -> REMOVED -> STARTING -> STARTED(unverified)
//!         -> STARTED(verified) | FAILED(timeout)
//! ```
//!
//! and the next instance is only touched once the previous replacement
//! answers on its port. A replacement that never answers stops the run.

use std::fmt;

use nbdeploy_runtime::{ContainerFilter, RuntimeError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::fleet::FleetHost;
use crate::launcher::{LaunchError, Launcher};
use crate::liveness::{Liveness, LivenessError};

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("failed to {step} {container}: {source}")]
    Runtime {
        step: &'static str,
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to relaunch on port {port}: {source}")]
    Launch {
        port: u16,
        #[source]
        source: LaunchError,
    },

    #[error(transparent)]
    Liveness(#[from] LivenessError),

    #[error("confirmation failed: {0}")]
    Confirm(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Lifecycle of one instance during an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpgradeState {
    Running,
    Stopping,
    Removed,
    Starting,
    StartedUnverified,
    StartedVerified,
    FailedTimeout,
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Removed => "REMOVED",
            Self::Starting => "STARTING",
            Self::StartedUnverified => "STARTED(unverified)",
            Self::StartedVerified => "STARTED(verified)",
            Self::FailedTimeout => "FAILED(timeout)",
        };
        f.write_str(s)
    }
}

/// A running instance scheduled for replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeTarget {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl UpgradeTarget {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    fn short_id(&self) -> &str {
        self.id.get(..7).unwrap_or(&self.id)
    }
}

/// A replaced instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradedInstance {
    pub name: String,
    pub port: u16,
    /// Liveness attempts until the replacement answered.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UpgradeOutcome {
    /// The operator declined.
    Aborted,
    Upgraded {
        host: String,
        instances: Vec<UpgradedInstance>,
    },
}

impl UpgradeOutcome {
    pub fn ports(&self) -> Vec<u16> {
        match self {
            Self::Aborted => Vec::new(),
            Self::Upgraded { instances, .. } => instances.iter().map(|i| i.port).collect(),
        }
    }
}

/// Replaces every running instance on one host.
pub struct Upgrader<'a> {
    host: &'a FleetHost,
    label: &'a str,
    launcher: Launcher<'a>,
    liveness: &'a dyn Liveness,
    image: Option<&'a str>,
}

impl<'a> Upgrader<'a> {
    pub fn new(
        host: &'a FleetHost,
        label: &'a str,
        launcher: Launcher<'a>,
        liveness: &'a dyn Liveness,
    ) -> Self {
        Self {
            host,
            label,
            launcher,
            liveness,
            image: None,
        }
    }

    /// Relaunch with this image instead of the configured one.
    pub fn with_image(mut self, image: Option<&'a str>) -> Self {
        self.image = image;
        self
    }

    /// Running service containers with a published port, in listing order.
    pub async fn targets(&self) -> Result<Vec<UpgradeTarget>, RuntimeError> {
        let running = self
            .host
            .runtime
            .list_containers(&ContainerFilter::label(self.label))
            .await?;

        let mut targets = Vec::with_capacity(running.len());
        for container in running {
            let Some((binding, port)) = container.published().next() else {
                warn!(id = %container.short_id(), "Skipping container without a published port");
                continue;
            };
            targets.push(UpgradeTarget {
                id: container.id.clone(),
                name: container.name().unwrap_or_default().to_string(),
                address: binding.specific_ip().unwrap_or(&self.host.address).to_string(),
                port,
            });
        }
        Ok(targets)
    }

    fn transition(&self, target: &UpgradeTarget, state: UpgradeState) {
        info!(
            host = %self.host.name,
            container = %target.short_id(),
            port = target.port,
            state = %state,
            "Upgrade transition"
        );
    }

    /// Replace every target after `confirm` approves the list.
    ///
    /// A failing `confirm` is an error, not a refusal.
    pub async fn run<F, E>(&self, confirm: F) -> Result<UpgradeOutcome, UpgradeError>
    where
        F: FnOnce(&[UpgradeTarget]) -> Result<bool, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let targets = self.targets().await.map_err(|source| UpgradeError::Runtime {
            step: "list containers on",
            container: self.host.name.clone(),
            source,
        })?;

        if !confirm(&targets).map_err(|e| UpgradeError::Confirm(e.into()))? {
            info!(host = %self.host.name, "Upgrade aborted");
            return Ok(UpgradeOutcome::Aborted);
        }

        let mut instances = Vec::with_capacity(targets.len());
        for target in &targets {
            instances.push(self.replace(target).await?);
        }

        info!(host = %self.host.name, upgraded = instances.len(), "Upgrade complete");
        Ok(UpgradeOutcome::Upgraded {
            host: self.host.name.clone(),
            instances,
        })
    }

    async fn replace(&self, target: &UpgradeTarget) -> Result<UpgradedInstance, UpgradeError> {
        let runtime = &self.host.runtime;
        let runtime_err = |step: &'static str| {
            let container = target.name.clone();
            move |source| UpgradeError::Runtime {
                step,
                container,
                source,
            }
        };

        self.transition(target, UpgradeState::Running);
        info!(container = %target.short_id(), address = %target.address, port = target.port, "Relaunching");

        self.transition(target, UpgradeState::Stopping);
        runtime
            .stop_container(&target.id)
            .await
            .map_err(runtime_err("stop"))?;
        runtime
            .remove_container(&target.id, false)
            .await
            .map_err(runtime_err("remove"))?;
        self.transition(target, UpgradeState::Removed);

        self.transition(target, UpgradeState::Starting);
        let launched = self
            .launcher
            .launch(Some(target.port), self.image)
            .await
            .map_err(|source| UpgradeError::Launch {
                port: target.port,
                source,
            })?;
        self.transition(target, UpgradeState::StartedUnverified);

        match self.liveness.wait_up(&target.url()).await {
            Ok(attempts) => {
                self.transition(target, UpgradeState::StartedVerified);
                Ok(UpgradedInstance {
                    name: launched.name,
                    port: launched.port,
                    attempts,
                })
            }
            Err(e) => {
                self.transition(target, UpgradeState::FailedTimeout);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(UpgradeState::StartedUnverified.to_string(), "STARTED(unverified)");
        assert_eq!(UpgradeState::FailedTimeout.to_string(), "FAILED(timeout)");
    }

    #[test]
    fn test_target_url() {
        let target = UpgradeTarget {
            id: "4fa6e0f0c678".to_string(),
            name: "nbviewer-8081".to_string(),
            address: "10.0.0.1".to_string(),
            port: 8081,
        };
        assert_eq!(target.url(), "http://10.0.0.1:8081");
        assert_eq!(target.short_id(), "4fa6e0f");
    }
}
