//! Status command (live instances across the fleet).

use anyhow::Result;
use clap::Args;

use crate::fleet::inspect;
use crate::output::print_output;

use super::CommandContext;

/// Status command - list the instances the CDN should be routing to.
#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let hosts = ctx.fleet().await?;
        let rows = inspect(&hosts, &ctx.settings.service.label).await?;
        print_output(&rows, ctx.format);
        Ok(())
    }
}
