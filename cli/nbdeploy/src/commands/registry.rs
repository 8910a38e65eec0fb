//! Registry and release commands (build trigger, version bumps).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::bump::{self, Bump};
use crate::output::{print_info, print_result, print_single, OutputFormat};
use crate::secrets;

use super::CommandContext;

/// Trigger-build command - ask the registry to rebuild the image.
#[derive(Debug, Args)]
pub struct TriggerBuildCommand {}

impl TriggerBuildCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let token = ctx.secrets.require(secrets::DOCKER_TRIGGER_TOKEN)?;
        let url = ctx.settings.registry.trigger_url.replace("{token}", token);

        let response = reqwest::Client::new()
            .post(&url)
            .form(&[("build", "true")])
            .send()
            .await
            .context("Failed to reach the build trigger")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Build trigger returned {status}: {body}");
        }

        print_result(
            ctx.format,
            &format!("Triggered a build of {}", ctx.settings.registry.repository),
            &status.as_u16(),
        );
        Ok(())
    }
}

/// Bump command - update a pinned version to the newest upstream one.
#[derive(Debug, Args)]
pub struct BumpCommand {
    #[command(subcommand)]
    target: BumpTarget,

    /// File receiving `key=value` outputs.
    #[arg(long, env = "GITHUB_OUTPUT")]
    github_output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum BumpTarget {
    /// Bump `image:` in the deployment config to the newest registry tag.
    Image,
    /// Bump `env.NBVIEWER_VERSION` in the workflow to upstream HEAD.
    Chart,
}

#[derive(Debug, Serialize)]
struct BumpReport {
    file: PathBuf,
    before: String,
    after: String,
    changed: bool,
}

impl BumpCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let settings = &ctx.settings;
        let (path, bump) = match self.target {
            BumpTarget::Image => {
                let path = settings.bump.deployment_file.clone();
                let contents = read(&path)?;
                let latest = bump::latest_image(
                    &reqwest::Client::new(),
                    &settings.registry.tags_url,
                    &settings.registry.repository,
                )
                .await
                .context("Failed to look up the newest image tag")?;
                (path, bump::plan_image(&contents, &latest)?)
            }
            BumpTarget::Chart => {
                let path = settings.bump.workflow_file.clone();
                let contents = read(&path)?;
                let latest = bump::latest_chart(&settings.bump.chart_repository).await?;
                (path, bump::plan_chart(&contents, &latest)?)
            }
        };

        let changed = bump::apply(&bump, &path)?;
        bump::emit_outputs(&bump.outputs, self.github_output.as_deref())?;
        report(ctx, &path, &bump, changed);
        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn report(ctx: &CommandContext, path: &Path, bump: &Bump, changed: bool) {
    let summary = BumpReport {
        file: path.to_path_buf(),
        before: bump.before.clone(),
        after: bump.after.clone(),
        changed,
    };
    if changed {
        print_result(
            ctx.format,
            &format!("{}: {} -> {}", path.display(), bump.before, bump.after),
            &summary,
        );
    } else if ctx.format == OutputFormat::Json {
        print_single(&summary);
    } else {
        print_info(&format!("{} is up to date ({})", path.display(), bump.before));
    }
}
