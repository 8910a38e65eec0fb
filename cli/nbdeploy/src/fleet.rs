//! Fleet inspection.
//!
//! A fleet is a list of hosts, each with a container runtime and the address
//! the CDN reaches it at. The live instance set is every published port of
//! every running service container on those hosts.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use nbdeploy_compute::{server_number, ComputeError, ComputeProvider};
use nbdeploy_reconcile::{Instance, InstanceSet};
use nbdeploy_runtime::{ContainerFilter, ContainerRuntime, PortBinding, RuntimeError};
use serde::Serialize;
use tabled::Tabled;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FleetSettings;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("fleet.advertise_host is required in single-host mode")]
    MissingAdvertiseHost,

    #[error("failed to list containers on {host}: {source}")]
    Runtime {
        host: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Compute(#[from] ComputeError),
}

/// One managed host.
#[derive(Clone)]
pub struct FleetHost {
    /// Identity prefix for instances on this host.
    pub name: String,

    /// Address the host is reachable at.
    pub address: String,

    pub runtime: Arc<dyn ContainerRuntime>,
}

impl std::fmt::Debug for FleetHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetHost")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl FleetHost {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            runtime,
        }
    }

    /// Address a published port is reachable at.
    ///
    /// Ports bound to all interfaces are reached at the host address.
    /// Loopback bindings are not reachable from the CDN.
    pub fn reachable_address<'a>(&'a self, binding: &'a PortBinding) -> Option<&'a str> {
        match binding.specific_ip() {
            None => Some(&self.address),
            Some(ip) if is_loopback(ip) => None,
            Some(ip) => Some(ip),
        }
    }

    /// Instance identity for a port on this host.
    pub fn identity(&self, port: u16) -> String {
        format!("{}-{}", self.name, port)
    }
}

fn is_loopback(ip: &str) -> bool {
    ip == "localhost" || ip.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// The local runtime as the only host.
pub fn single_host(
    settings: &FleetSettings,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<FleetHost, FleetError> {
    let address = settings
        .advertise_host
        .clone()
        .filter(|a| !a.is_empty())
        .ok_or(FleetError::MissingAdvertiseHost)?;
    let name = settings.host_name.clone().unwrap_or_else(|| address.clone());
    Ok(FleetHost::new(name, address, runtime))
}

/// Every `<prefix>-<n>` compute server as a host, ordered by number.
///
/// `connect` builds the runtime client for a Docker endpoint
/// (`tcp://<ip>:<port>`). Servers without a public IPv4 are skipped.
pub async fn clustered_hosts<P, F>(
    provider: &P,
    prefix: &str,
    docker_port: u16,
    connect: F,
) -> Result<Vec<FleetHost>, FleetError>
where
    P: ComputeProvider + ?Sized,
    F: Fn(&str) -> Result<Arc<dyn ContainerRuntime>, RuntimeError>,
{
    let mut servers: Vec<_> = provider
        .list_servers(prefix)
        .await?
        .into_iter()
        .filter_map(|s| server_number(&s.name, prefix).map(|n| (n, s)))
        .collect();
    servers.sort_by_key(|(n, _)| *n);

    let mut hosts = Vec::with_capacity(servers.len());
    for (_, server) in servers {
        let Some(ip) = server.public_ipv4().map(str::to_string) else {
            warn!(server = %server.name, "Skipping server without a public IPv4 address");
            continue;
        };
        let endpoint = format!("tcp://{ip}:{docker_port}");
        let runtime = connect(&endpoint).map_err(|source| FleetError::Runtime {
            host: server.name.clone(),
            source,
        })?;
        debug!(server = %server.name, endpoint = %endpoint, "Resolved fleet host");
        hosts.push(FleetHost::new(server.name, ip, runtime));
    }
    Ok(hosts)
}

/// One row of the fleet status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct InstanceRow {
    #[tabled(rename = "Host")]
    pub host: String,

    #[tabled(rename = "Container")]
    pub container: String,

    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Address")]
    pub address: String,

    #[tabled(rename = "Port")]
    pub port: u16,

    #[tabled(rename = "Backend")]
    pub identity: String,

    #[tabled(rename = "Status")]
    pub status: String,
}

/// Running service containers on every host, one row per reachable
/// `(address, port)`.
pub async fn inspect(hosts: &[FleetHost], label: &str) -> Result<Vec<InstanceRow>, FleetError> {
    let filter = ContainerFilter::label(label);
    let mut rows = Vec::new();
    let mut seen = BTreeSet::new();

    for host in hosts {
        let containers = host
            .runtime
            .list_containers(&filter)
            .await
            .map_err(|source| FleetError::Runtime {
                host: host.name.clone(),
                source,
            })?;

        for container in &containers {
            let mut published = container.published().peekable();
            if published.peek().is_none() {
                debug!(host = %host.name, container = %container.short_id(), "Skipping container without published ports");
                continue;
            }
            for (binding, port) in published {
                let Some(address) = host.reachable_address(binding) else {
                    warn!(
                        host = %host.name,
                        container = %container.short_id(),
                        port,
                        ip = binding.ip.as_deref().unwrap_or_default(),
                        "Skipping port bound to loopback"
                    );
                    continue;
                };
                let address = address.to_string();
                if !seen.insert((address.clone(), port)) {
                    continue;
                }
                rows.push(InstanceRow {
                    host: host.name.clone(),
                    container: container.name().unwrap_or_default().to_string(),
                    id: container.short_id().to_string(),
                    address,
                    port,
                    identity: host.identity(port),
                    status: container.status.clone(),
                });
            }
        }
    }
    Ok(rows)
}

/// The live instance set, de-duplicated by `(address, port)`.
pub async fn live_instances(hosts: &[FleetHost], label: &str) -> Result<InstanceSet, FleetError> {
    let rows = inspect(hosts, label).await?;
    let instances: InstanceSet = rows
        .into_iter()
        .map(|row| Instance::new(row.address, row.port, row.identity))
        .collect();
    debug!(hosts = hosts.len(), instances = instances.len(), "Inspected fleet");
    Ok(instances)
}
