//! CLI commands.

mod containers;
mod fleet;
mod reconcile;
mod registry;
mod servers;
mod smoke;
mod upgrade;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nbdeploy_cdn::{CdnApi, FastlyClient};
use nbdeploy_compute::{ComputeProvider, RackspaceClient};
use nbdeploy_runtime::{ContainerRuntime, DockerClient};
use tokio::sync::OnceCell;

use crate::config::{FleetMode, Settings};
use crate::error::CliError;
use crate::fleet::{clustered_hosts, single_host, FleetHost};
use crate::output::OutputFormat;
use crate::secrets::{self, Secrets};

/// nbdeploy - deployment tasks for the nbviewer fleet.
#[derive(Debug, Parser)]
#[command(name = "nbdeploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Log format on stderr.
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Settings file.
    #[arg(long, global = true, env = "NBDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Credentials file.
    #[arg(long, global = true, env = "NBDEPLOY_CREDS", default_value = "creds")]
    pub creds: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sync the CDN backend pool with the live instances.
    #[command(alias = "fastly")]
    Reconcile(reconcile::ReconcileCommand),

    /// Show live instances across the fleet.
    Status(fleet::StatusCommand),

    /// Replace every running instance on this host, one at a time.
    Upgrade(upgrade::UpgradeCommand),

    /// Upgrade every host of the fleet, then reconcile the CDN.
    DeployAll(upgrade::DeployAllCommand),

    /// Check that the public site serves its featured notebooks.
    Smoke(smoke::SmokeCommand),

    /// Start one instance.
    Launch(containers::LaunchCommand),

    /// Set up a host: images, sidecar, log forwarder and instances.
    Bootstrap(containers::BootstrapCommand),

    /// Pull images.
    Pull(containers::PullCommand),

    /// Build the service image.
    Build(containers::BuildCommand),

    /// Restart every service container.
    Restart(containers::RestartCommand),

    /// Remove exited service containers.
    Cleanup(containers::CleanupCommand),

    /// Start the cache sidecar.
    Sidecar(containers::SidecarCommand),

    /// Start the log forwarder.
    Logentries(containers::LogentriesCommand),

    /// Rebuild and run the status page.
    Statuspage(containers::StatuspageCommand),

    /// List fleet servers.
    Servers(servers::ServersCommand),

    /// Create the next fleet server.
    NewServer(servers::NewServerCommand),

    /// Trigger an image build on the registry.
    TriggerBuild(registry::TriggerBuildCommand),

    /// Bump the deployed image or chart version.
    Bump(registry::BumpCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        if let Commands::Version = self.command {
            println!("nbdeploy {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let settings = Settings::load(self.config.as_deref())?;
        let secrets = Secrets::load(&self.creds)?;
        let ctx = CommandContext::new(settings, secrets, self.format);

        self.command.run(&ctx).await
    }
}

impl Commands {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        match self {
            Commands::Reconcile(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Upgrade(cmd) => cmd.run(ctx).await,
            Commands::DeployAll(cmd) => cmd.run(ctx).await,
            Commands::Smoke(cmd) => cmd.run(ctx).await,
            Commands::Launch(cmd) => cmd.run(ctx).await,
            Commands::Bootstrap(cmd) => cmd.run(ctx).await,
            Commands::Pull(cmd) => cmd.run(ctx).await,
            Commands::Build(cmd) => cmd.run(ctx).await,
            Commands::Restart(cmd) => cmd.run(ctx).await,
            Commands::Cleanup(cmd) => cmd.run(ctx).await,
            Commands::Sidecar(cmd) => cmd.run(ctx).await,
            Commands::Logentries(cmd) => cmd.run(ctx).await,
            Commands::Statuspage(cmd) => cmd.run(ctx).await,
            Commands::Servers(cmd) => cmd.run(ctx).await,
            Commands::NewServer(cmd) => cmd.run(ctx).await,
            Commands::TriggerBuild(cmd) => cmd.run(ctx).await,
            Commands::Bump(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("nbdeploy {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
///
/// Clients are built on first use and kept for the rest of the process.
pub struct CommandContext {
    pub settings: Settings,
    pub secrets: Secrets,
    pub format: OutputFormat,
    runtime: OnceCell<Arc<dyn ContainerRuntime>>,
    compute: OnceCell<Arc<dyn ComputeProvider>>,
    cdn: Option<Arc<dyn CdnApi>>,
}

impl CommandContext {
    pub fn new(settings: Settings, secrets: Secrets, format: OutputFormat) -> Self {
        Self {
            settings,
            secrets,
            format,
            runtime: OnceCell::new(),
            compute: OnceCell::new(),
            cdn: None,
        }
    }

    /// Use `runtime` as the local container runtime.
    pub fn with_runtime(self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime: OnceCell::new_with(Some(runtime)),
            ..self
        }
    }

    /// Use `compute` as the compute provider.
    pub fn with_compute(self, compute: Arc<dyn ComputeProvider>) -> Self {
        Self {
            compute: OnceCell::new_with(Some(compute)),
            ..self
        }
    }

    /// Use `cdn` instead of the configured CDN service.
    pub fn with_cdn(self, cdn: Arc<dyn CdnApi>) -> Self {
        Self {
            cdn: Some(cdn),
            ..self
        }
    }

    /// The local container runtime (`DOCKER_HOST` or the default socket).
    pub async fn runtime(&self) -> Result<Arc<dyn ContainerRuntime>> {
        let runtime = self
            .runtime
            .get_or_try_init(|| async {
                let client = DockerClient::from_env().context("Invalid DOCKER_HOST")?;
                tracing::debug!(endpoint = %client.endpoint(), "Using local container runtime");
                Ok::<_, anyhow::Error>(Arc::new(client) as Arc<dyn ContainerRuntime>)
            })
            .await?;
        Ok(Arc::clone(runtime))
    }

    /// CDN client for the configured service.
    pub fn cdn(&self) -> Result<Arc<dyn CdnApi>> {
        if let Some(cdn) = &self.cdn {
            return Ok(Arc::clone(cdn));
        }
        let key = self.secrets.require(secrets::FASTLY_KEY)?;
        let service_id = self.secrets.require(secrets::FASTLY_SERVICE_ID)?;
        let client = FastlyClient::new(&self.settings.cdn.api_url, key, service_id)
            .context("Failed to build CDN client")?;
        Ok(Arc::new(client))
    }

    /// Authenticated compute provider.
    pub async fn compute(&self) -> Result<Arc<dyn ComputeProvider>> {
        let compute = self
            .compute
            .get_or_try_init(|| async {
                let username = self.secrets.require(secrets::OS_USERNAME)?;
                let api_key = self.secrets.require(secrets::OS_PASSWORD)?;
                let settings = &self.settings.compute;
                let client = RackspaceClient::connect(
                    &settings.identity_url,
                    username,
                    api_key,
                    &settings.region,
                )
                .await
                .context("Failed to authenticate with the compute provider")?;
                Ok::<_, anyhow::Error>(Arc::new(client) as Arc<dyn ComputeProvider>)
            })
            .await?;
        Ok(Arc::clone(compute))
    }

    /// Hosts of the fleet, per `[fleet] mode`.
    pub async fn fleet(&self) -> Result<Vec<FleetHost>> {
        match self.settings.fleet.mode {
            FleetMode::Single => {
                let runtime = self.runtime().await?;
                Ok(vec![single_host(&self.settings.fleet, runtime)?])
            }
            FleetMode::Clustered => {
                let compute = self.compute().await?;
                let hosts = clustered_hosts(
                    compute.as_ref(),
                    &self.settings.compute.server_prefix,
                    self.settings.fleet.docker_port,
                    |endpoint| {
                        DockerClient::from_host(endpoint)
                            .map(|client| Arc::new(client) as Arc<dyn ContainerRuntime>)
                    },
                )
                .await?;
                Ok(hosts)
            }
        }
    }

    /// The local runtime as a host, for commands that act on this host only.
    ///
    /// The address falls back to the `DOCKER_HOST` address, then loopback.
    pub async fn local_host(&self) -> Result<FleetHost> {
        let runtime = self.runtime().await?;
        let fleet = &self.settings.fleet;
        let address = match fleet.advertise_host.clone().filter(|a| !a.is_empty()) {
            Some(address) => address,
            None => std::env::var("DOCKER_HOST")
                .ok()
                .and_then(|host| docker_host_address(&host))
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        };
        let name = fleet.host_name.clone().unwrap_or_else(|| address.clone());
        Ok(FleetHost::new(name, address, runtime))
    }
}

/// Ask for confirmation; anything but an explicit yes declines.
///
/// Fails when there is no terminal to ask on.
pub(crate) fn confirm(prompt: &str) -> Result<bool, CliError> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| CliError::NotInteractive(e.to_string()))
}

/// Host part of a `tcp://host:port` endpoint.
fn docker_host_address(docker_host: &str) -> Option<String> {
    let rest = docker_host
        .strip_prefix("tcp://")
        .or_else(|| docker_host.strip_prefix("http://"))?;
    let (host, _port) = rest.trim_end_matches('/').rsplit_once(':')?;
    Some(host.trim_start_matches('[').trim_end_matches(']').to_string())
}
