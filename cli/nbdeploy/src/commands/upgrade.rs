//! Upgrade commands (rolling replacement on one host or the whole fleet).

use std::convert::Infallible;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::fleet::FleetHost;
use crate::launcher::Launcher;
use crate::liveness::HttpProbe;
use crate::output::{print_info, print_output, print_single, print_success, OutputFormat};
use crate::upgrade::{UpgradeOutcome, Upgrader};

use super::containers::{build_service, pull_images};
use super::reconcile::ReconcileCommand;
use super::smoke::SmokeCommand;
use super::{confirm, CommandContext};

fn prompt(count: usize) -> String {
    format!("Are you sure? This will delete (including logs) {count} containers")
}

/// Image refresh options shared by the upgrade commands.
#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Skip pulling images first.
    #[arg(long)]
    no_pull: bool,

    /// Skip building the service image first.
    #[arg(long)]
    no_build: bool,

    /// Image to relaunch with instead of `[service] image`.
    #[arg(long)]
    image: Option<String>,
}

impl RefreshArgs {
    async fn refresh(&self, ctx: &CommandContext, host: &FleetHost) -> Result<()> {
        let runtime = host.runtime.as_ref();
        if !self.no_pull {
            pull_images(runtime, &ctx.settings, &ctx.settings.images.pull).await?;
        }
        if !self.no_build {
            build_service(runtime, &ctx.settings).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Tabled)]
struct UpgradedRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

fn upgraded_rows(outcomes: &[UpgradeOutcome]) -> Vec<UpgradedRow> {
    outcomes
        .iter()
        .flat_map(|outcome| match outcome {
            UpgradeOutcome::Aborted => Vec::new(),
            UpgradeOutcome::Upgraded { host, instances } => instances
                .iter()
                .map(|i| UpgradedRow {
                    host: host.clone(),
                    name: i.name.clone(),
                    port: i.port,
                    attempts: i.attempts,
                })
                .collect(),
        })
        .collect()
}

fn report(ctx: &CommandContext, outcomes: &[UpgradeOutcome]) {
    let rows = upgraded_rows(outcomes);
    match ctx.format {
        OutputFormat::Json => print_single(&rows),
        OutputFormat::Table => {
            let ports: Vec<String> = rows.iter().map(|r| r.port.to_string()).collect();
            print_output(&rows, ctx.format);
            print_success(&format!(
                "Upgraded {} instance(s) on port(s) {}",
                rows.len(),
                ports.join(", ")
            ));
        }
    }
}

/// Upgrade command - replace every instance on this host.
#[derive(Debug, Args)]
pub struct UpgradeCommand {
    /// Skip the confirmation prompt.
    #[arg(long, short)]
    yes: bool,

    #[command(flatten)]
    refresh: RefreshArgs,
}

impl UpgradeCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let host = ctx.local_host().await?;
        let probe = HttpProbe::from_settings(&ctx.settings.liveness)?;
        self.refresh.refresh(ctx, &host).await?;

        let launcher = Launcher::new(
            host.runtime.as_ref(),
            &ctx.settings.service,
            &ctx.settings.sidecar,
        );
        let upgrader = Upgrader::new(&host, &ctx.settings.service.label, launcher, &probe)
            .with_image(self.refresh.image.as_deref());

        let yes = self.yes;
        let outcome = upgrader
            .run(|targets| if yes { Ok(true) } else { confirm(&prompt(targets.len())) })
            .await?;

        if outcome == UpgradeOutcome::Aborted {
            print_info("Aborted");
            return Ok(());
        }
        report(ctx, &[outcome]);
        Ok(())
    }
}

/// Deploy-all command - upgrade every host, then reconcile the CDN.
#[derive(Debug, Args)]
pub struct DeployAllCommand {
    /// Skip the confirmation prompt.
    #[arg(long, short)]
    yes: bool,

    /// Run the smoke check once the CDN is reconciled.
    #[arg(long)]
    smoke: bool,

    #[command(flatten)]
    refresh: RefreshArgs,
}

impl DeployAllCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let hosts = ctx.fleet().await?;
        let probe = HttpProbe::from_settings(&ctx.settings.liveness)?;
        let label = &ctx.settings.service.label;

        let mut total = 0;
        for host in &hosts {
            let launcher = Launcher::new(
                host.runtime.as_ref(),
                &ctx.settings.service,
                &ctx.settings.sidecar,
            );
            let targets = Upgrader::new(host, label, launcher, &probe)
                .targets()
                .await
                .with_context(|| format!("Failed to list containers on {}", host.name))?;
            total += targets.len();
        }
        if !self.yes && !confirm(&prompt(total))? {
            print_info("Aborted");
            return Ok(());
        }

        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in &hosts {
            tracing::info!(host = %host.name, "Upgrading host");
            self.refresh.refresh(ctx, host).await?;
            let launcher = Launcher::new(
                host.runtime.as_ref(),
                &ctx.settings.service,
                &ctx.settings.sidecar,
            );
            let outcome = Upgrader::new(host, label, launcher, &probe)
                .with_image(self.refresh.image.as_deref())
                .run(|_| Ok::<_, Infallible>(true))
                .await
                .with_context(|| format!("Upgrade of {} failed", host.name))?;
            outcomes.push(outcome);
        }
        report(ctx, &outcomes);

        ReconcileCommand { dry_run: false }.run(ctx).await?;
        if self.smoke {
            SmokeCommand { url: None }.run(ctx).await?;
        }
        Ok(())
    }
}
