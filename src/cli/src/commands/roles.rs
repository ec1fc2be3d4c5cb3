//! Role management commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RoleCommands {
    /// List roles of the gateway's organization
    List,

    /// Create a role
    Create {
        name: String,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Update a role
    Update {
        name: String,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Enable or disable the role
        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Delete a role
    Delete {
        name: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct RoleInfo {
    #[tabled(rename = "Name")]
    name: String,
    #[serde(default)]
    #[tabled(rename = "Display Name")]
    display_name: String,
    #[serde(default)]
    #[tabled(rename = "Description")]
    description: String,
    #[serde(default)]
    #[tabled(rename = "Enabled")]
    is_enabled: bool,
}

pub async fn execute(cmd: RoleCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RoleCommands::List => {
            let roles: Vec<RoleInfo> = client.get("/api/roles").await?;
            output::print_list(&roles, format)?;
        }

        RoleCommands::Create {
            name,
            display_name,
            description,
        } => {
            let body = serde_json::json!({
                "name": name,
                "display_name": display_name,
                "description": description,
            });
            let role: RoleInfo = client.post("/api/roles", &body).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("Role {} created", role.name)),
                _ => output::print_item(&role, format)?,
            }
        }

        RoleCommands::Update {
            name,
            display_name,
            description,
            enabled,
        } => {
            let body = serde_json::json!({
                "display_name": display_name,
                "description": description,
                "is_enabled": enabled,
            });
            let role: RoleInfo = client.put(&format!("/api/roles/{}", name), &body).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("Role {} updated", role.name)),
                _ => output::print_item(&role, format)?,
            }
        }

        RoleCommands::Delete { name, force } => {
            if !force {
                output::print_info("This will delete the role. Use --force to skip confirmation.");
                return Ok(());
            }

            let resp: serde_json::Value = client.delete(&format!("/api/roles/{}", name)).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("Role {} deleted", name)),
                _ => output::print_item(&resp, format)?,
            }
        }
    }

    Ok(())
}
