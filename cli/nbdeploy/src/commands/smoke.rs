//! Smoke command (check the public site after a deploy).

use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::output::{print_output, print_single, print_success, OutputFormat};
use crate::smoke::SmokeCheck;

use super::CommandContext;

/// Smoke command - fetch the front page and every notebook it features.
#[derive(Debug, Args)]
pub struct SmokeCommand {
    /// Site to check instead of [smoke] base_url.
    #[arg(long)]
    pub(super) url: Option<String>,
}

impl SmokeCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let settings = &ctx.settings.smoke;
        let base_url = self.url.as_deref().unwrap_or(&settings.base_url);
        let check = SmokeCheck::new(
            base_url,
            settings.min_thumbnails,
            Duration::from_secs(settings.timeout_secs),
        )?;

        let report = check.run().await?;
        match ctx.format {
            OutputFormat::Json => print_single(&report),
            OutputFormat::Table => {
                let failed: Vec<_> = report.failures().cloned().collect();
                if failed.is_empty() {
                    print_success(&format!(
                        "{} rendered {} featured notebooks",
                        report.front_page,
                        report.pages.len()
                    ));
                } else {
                    print_output(&failed, ctx.format);
                }
            }
        }
        report.ensure_ok()?;
        Ok(())
    }
}
