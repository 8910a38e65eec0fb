//! Reconcile command (sync CDN backends with the fleet).

use anyhow::{Context, Result};
use clap::Args;
use nbdeploy_reconcile::{BackendReconciler, PlannedChange, ReconcileOutcome};
use serde::Serialize;
use tabled::Tabled;

use crate::fleet::live_instances;
use crate::output::{print_info, print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Reconcile command - make the CDN backend pool match the live instances.
#[derive(Debug, Args)]
pub struct ReconcileCommand {
    /// Print the plan without changing anything.
    #[arg(long)]
    pub(super) dry_run: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct PlanRow {
    #[tabled(rename = "Action")]
    action: &'static str,
    #[tabled(rename = "Backend")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Port")]
    port: u16,
}

#[derive(Debug, Serialize)]
struct ReconcileSummary {
    changed: bool,
    activated: Option<u32>,
    draft: Option<u32>,
    removed: Vec<String>,
    added: Vec<String>,
}

impl From<&ReconcileOutcome> for ReconcileSummary {
    fn from(outcome: &ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Unchanged => Self {
                changed: false,
                activated: None,
                draft: None,
                removed: Vec::new(),
                added: Vec::new(),
            },
            ReconcileOutcome::Applied {
                activated,
                draft,
                removed,
                added,
            } => Self {
                changed: true,
                activated: Some(*activated),
                draft: Some(*draft),
                removed: removed.clone(),
                added: added.clone(),
            },
        }
    }
}

fn plan_rows(planned: &PlannedChange) -> Vec<PlanRow> {
    let removals = planned.plan.remove.iter().map(|b| PlanRow {
        action: "delete",
        name: b.name.clone(),
        address: b.address.clone(),
        port: b.port,
    });
    let additions = planned.plan.add.iter().map(|i| PlanRow {
        action: "create",
        name: i.identity.clone(),
        address: i.host.clone(),
        port: i.port,
    });
    removals.chain(additions).collect()
}

impl ReconcileCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let hosts = ctx.fleet().await?;
        let live = live_instances(&hosts, &ctx.settings.service.label)
            .await
            .context("Failed to inspect the fleet")?;
        let cdn = ctx.cdn()?;
        let reconciler = BackendReconciler::new(cdn.as_ref())
            .with_default_template(ctx.settings.cdn.default_template.clone());

        if self.dry_run {
            let planned = reconciler.plan(&live).await?;
            let rows = plan_rows(&planned);
            match ctx.format {
                OutputFormat::Json => print_single(&rows),
                OutputFormat::Table if planned.is_noop() => print_success("Fastly OK"),
                OutputFormat::Table if planned.plan.is_empty() => print_info(&format!(
                    "Draft version {} differs from the active version and would be activated",
                    planned.version
                )),
                OutputFormat::Table => {
                    print_info(&format!(
                        "{} change(s) against version {}",
                        planned.plan.mutation_count(),
                        planned.version
                    ));
                    print_output(&rows, ctx.format);
                }
            }
            return Ok(());
        }

        let outcome = reconciler.reconcile(&live).await?;
        match ctx.format {
            OutputFormat::Json => print_single(&ReconcileSummary::from(&outcome)),
            OutputFormat::Table => match &outcome {
                ReconcileOutcome::Unchanged => print_success("Fastly OK"),
                ReconcileOutcome::Applied {
                    activated,
                    draft,
                    removed,
                    added,
                } => {
                    for name in removed {
                        println!("  - {name}");
                    }
                    for name in added {
                        println!("  + {name}");
                    }
                    print_success(&format!(
                        "Activated version {activated} ({} removed, {} added); draft {draft} is ready",
                        removed.len(),
                        added.len()
                    ));
                }
            },
        }
        Ok(())
    }
}
