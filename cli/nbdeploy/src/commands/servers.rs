//! Compute server commands.

use std::fs;

use anyhow::{Context, Result};
use clap::Args;
use nbdeploy_compute::{ensure_keypair, provision_server, server_number, Server, ServerTemplate};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{display_option, print_info, print_output, print_result};

use super::CommandContext;

#[derive(Debug, Serialize, Tabled)]
struct ServerRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "IPv4")]
    #[tabled(display = "display_option")]
    ipv4: Option<String>,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&Server> for ServerRow {
    fn from(server: &Server) -> Self {
        Self {
            name: server.name.clone(),
            ipv4: server.public_ipv4().map(str::to_string),
            status: server.status.clone(),
            id: server.id.clone(),
        }
    }
}

/// Servers command - list fleet servers.
#[derive(Debug, Args)]
pub struct ServersCommand {}

impl ServersCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let compute = ctx.compute().await?;
        let prefix = &ctx.settings.compute.server_prefix;
        let mut servers: Vec<Server> = compute
            .list_servers(prefix)
            .await?
            .into_iter()
            .filter(|s| server_number(&s.name, prefix).is_some())
            .collect();
        servers.sort_by_key(|s| server_number(&s.name, prefix));

        let rows: Vec<ServerRow> = servers.iter().map(ServerRow::from).collect();
        print_output(&rows, ctx.format);
        Ok(())
    }
}

/// New-server command - create the next `<prefix>-<n>` server.
#[derive(Debug, Args)]
pub struct NewServerCommand {}

impl NewServerCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let compute = ctx.compute().await?;
        let settings = &ctx.settings.compute;

        let key_name = match (&settings.keypair_name, &settings.public_key_path) {
            (Some(name), Some(path)) => {
                let public_key = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read public key {}", path.display()))?;
                if ensure_keypair(compute.as_ref(), name, &public_key).await? {
                    print_info(&format!("Registered keypair {name}"));
                }
                Some(name.clone())
            }
            (Some(name), None) => Some(name.clone()),
            (None, _) => None,
        };

        let template = ServerTemplate {
            prefix: settings.server_prefix.clone(),
            flavor_id: settings.flavor.clone(),
            image_fragments: settings.image_fragments.clone(),
            key_name,
        };
        let server = provision_server(compute.as_ref(), &template).await?;

        let row = ServerRow::from(&server);
        print_result(
            ctx.format,
            &format!("Created server {} ({})", row.name, row.status),
            &row,
        );
        Ok(())
    }
}
