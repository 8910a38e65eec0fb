//! Container commands on the local host (pull, build, launch, support containers).

use anyhow::{Context, Result};
use clap::Args;
use nbdeploy_runtime::{ContainerFilter, ContainerRuntime};
use serde::Serialize;

use crate::config::Settings;
use crate::launcher::{ensure_log_forwarder, run_statuspage, Launched, Launcher};
use crate::output::{print_info, print_result, print_single, print_success, OutputFormat};
use crate::secrets;

use super::CommandContext;

/// Pull `images`, qualifying bare names.
pub(super) async fn pull_images(
    runtime: &dyn ContainerRuntime,
    settings: &Settings,
    images: &[String],
) -> Result<Vec<String>> {
    let mut pulled = Vec::with_capacity(images.len());
    for image in images {
        let image = settings.images.qualify(image);
        tracing::info!(image = %image, "Pulling image");
        runtime
            .pull_image(&image)
            .await
            .with_context(|| format!("Failed to pull {image}"))?;
        pulled.push(image);
    }
    Ok(pulled)
}

/// Build the service image from its build context.
pub(super) async fn build_service(runtime: &dyn ContainerRuntime, settings: &Settings) -> Result<()> {
    let service = &settings.service;
    tracing::info!(tag = %service.build_tag, context = %service.build_context.display(), "Building image");
    runtime
        .build_image(&service.build_context, &service.build_tag, false)
        .await
        .with_context(|| format!("Failed to build {}", service.build_tag))
}

fn log_host_name(ctx: &CommandContext) -> String {
    let fleet = &ctx.settings.fleet;
    ctx.settings
        .logging
        .host_name
        .clone()
        .or_else(|| fleet.host_name.clone())
        .or_else(|| fleet.advertise_host.clone())
        .unwrap_or_else(|| "localhost".to_string())
}

async fn start_log_forwarder(ctx: &CommandContext, runtime: &dyn ContainerRuntime) -> Result<String> {
    let token = ctx.secrets.require(secrets::LOGENTRIES_TOKEN)?;
    let id = ensure_log_forwarder(runtime, &ctx.settings.logging, token, &log_host_name(ctx))
        .await
        .context("Failed to start the log forwarder")?;
    Ok(id)
}

/// Pull command - refresh images.
#[derive(Debug, Args)]
pub struct PullCommand {
    /// Images to pull; defaults to `[images] pull`.
    images: Vec<String>,
}

impl PullCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let images = if self.images.is_empty() {
            ctx.settings.images.pull.clone()
        } else {
            self.images
        };
        let pulled = pull_images(runtime.as_ref(), &ctx.settings, &images).await?;
        print_result(ctx.format, &format!("Pulled {}", pulled.join(", ")), &pulled);
        Ok(())
    }
}

/// Build command - build the service image.
#[derive(Debug, Args)]
pub struct BuildCommand {}

impl BuildCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        build_service(runtime.as_ref(), &ctx.settings).await?;
        let tag = &ctx.settings.service.build_tag;
        print_result(ctx.format, &format!("Built {tag}"), tag);
        Ok(())
    }
}

/// Sidecar command - start the cache sidecar.
#[derive(Debug, Args)]
pub struct SidecarCommand {}

impl SidecarCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let launcher = Launcher::new(runtime.as_ref(), &ctx.settings.service, &ctx.settings.sidecar);
        let id = launcher.ensure_sidecar().await?;
        print_result(ctx.format, &format!("Sidecar running ({id})"), &id);
        Ok(())
    }
}

/// Logentries command - start the log forwarder.
#[derive(Debug, Args)]
pub struct LogentriesCommand {}

impl LogentriesCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let id = start_log_forwarder(ctx, runtime.as_ref()).await?;
        print_result(ctx.format, &format!("Log forwarder running ({id})"), &id);
        Ok(())
    }
}

/// Statuspage command - rebuild and replace the status page.
#[derive(Debug, Args)]
pub struct StatuspageCommand {}

impl StatuspageCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let id = run_statuspage(runtime.as_ref(), &ctx.settings.statuspage)
            .await
            .context("Failed to run the status page")?;
        print_result(ctx.format, &format!("Status page running ({id})"), &id);
        Ok(())
    }
}

/// Launch command - start one instance.
#[derive(Debug, Args)]
pub struct LaunchCommand {
    /// Host port; defaults to the lowest free port.
    #[arg(long)]
    port: Option<u16>,

    /// Image to run instead of `[service] image`.
    #[arg(long)]
    image: Option<String>,
}

impl LaunchCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let launcher = Launcher::new(runtime.as_ref(), &ctx.settings.service, &ctx.settings.sidecar);
        let launched = launcher.launch(self.port, self.image.as_deref()).await?;
        print_result(
            ctx.format,
            &format!("Launched {} on port {}", launched.name, launched.port),
            &launched,
        );
        Ok(())
    }
}

/// Bootstrap command - prepare a host and start instances.
#[derive(Debug, Args)]
pub struct BootstrapCommand {
    /// Number of instances to start.
    #[arg(default_value_t = 2)]
    count: usize,
}

#[derive(Debug, Serialize)]
struct BootstrapReport {
    sidecar: String,
    log_forwarder: String,
    instances: Vec<Launched>,
}

impl BootstrapCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let settings = &ctx.settings;

        pull_images(runtime.as_ref(), settings, &settings.images.pull).await?;
        build_service(runtime.as_ref(), settings).await?;

        let launcher = Launcher::new(runtime.as_ref(), &settings.service, &settings.sidecar);
        let sidecar = launcher.ensure_sidecar().await?;
        let log_forwarder = start_log_forwarder(ctx, runtime.as_ref()).await?;

        let mut instances = Vec::with_capacity(self.count);
        for _ in 0..self.count {
            instances.push(launcher.launch(None, None).await?);
        }

        let report = BootstrapReport {
            sidecar,
            log_forwarder,
            instances,
        };
        match ctx.format {
            OutputFormat::Json => print_single(&report),
            OutputFormat::Table => {
                let ports: Vec<String> =
                    report.instances.iter().map(|i| i.port.to_string()).collect();
                print_success(&format!(
                    "Started {} instance(s) on port(s) {}",
                    report.instances.len(),
                    ports.join(", ")
                ));
            }
        }
        Ok(())
    }
}

/// Restart command - restart every service container.
#[derive(Debug, Args)]
pub struct RestartCommand {}

impl RestartCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let containers = runtime
            .list_containers(&ContainerFilter::label(&ctx.settings.service.label).all())
            .await?;

        let mut restarted = Vec::with_capacity(containers.len());
        for container in &containers {
            tracing::info!(id = %container.short_id(), "Restarting container");
            runtime.restart_container(&container.id).await?;
            restarted.push(container.short_id().to_string());
        }
        print_result(
            ctx.format,
            &format!("Restarted {} container(s)", restarted.len()),
            &restarted,
        );
        Ok(())
    }
}

/// Cleanup command - remove exited service containers.
#[derive(Debug, Args)]
pub struct CleanupCommand {}

impl CleanupCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let runtime = ctx.runtime().await?;
        let exited = runtime
            .list_containers(
                &ContainerFilter::label(&ctx.settings.service.label)
                    .all()
                    .status("exited"),
            )
            .await?;

        if exited.is_empty() {
            match ctx.format {
                OutputFormat::Json => print_single(&Vec::<String>::new()),
                OutputFormat::Table => print_info("No containers to cleanup"),
            }
            return Ok(());
        }

        let mut removed = Vec::with_capacity(exited.len());
        for container in &exited {
            tracing::info!(id = %container.short_id(), "Removing exited container");
            runtime.remove_container(&container.id, false).await?;
            removed.push(container.short_id().to_string());
        }
        print_result(
            ctx.format,
            &format!("Removed {} container(s)", removed.len()),
            &removed,
        );
        Ok(())
    }
}
