//! User management commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum UserCommands {
    /// List users of the gateway's organization
    List,

    /// Create a user
    Create {
        /// User name
        name: String,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        /// Initial password
        #[arg(long, env = "PORTCULLIS_NEW_USER_PASSWORD")]
        password: Option<String>,
    },

    /// Update a user's profile
    Update {
        name: String,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long, env = "PORTCULLIS_NEW_USER_PASSWORD")]
        password: Option<String>,
    },

    /// Delete a user
    Delete {
        name: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Give a user a role and re-sync the policy
    AssignRole {
        user: String,
        role: String,
    },

    /// Take a role from a user and re-sync the policy
    RemoveRole {
        user: String,
        role: String,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct UserInfo {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct UserRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Display Name")]
    display_name: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Roles")]
    roles: String,
}

#[derive(Debug, Serialize)]
struct UserFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RoleChange {
    user: String,
    role: String,
    synced: bool,
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: UserCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        UserCommands::List => {
            let users: Vec<UserInfo> = client.get("/api/users").await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<UserRow> = users
                        .into_iter()
                        .map(|u| UserRow {
                            name: u.name,
                            display_name: u.display_name,
                            email: u.email,
                            roles: u.roles.join(", "),
                        })
                        .collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&users, format)?,
            }
        }

        UserCommands::Create {
            name,
            display_name,
            email,
            password,
        } => {
            let body = UserFields {
                name: Some(name),
                display_name,
                email,
                password,
            };
            let user: UserInfo = client.post("/api/users", &body).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("User {} created", user.name)),
                _ => output::print_item(&user, format)?,
            }
        }

        UserCommands::Update {
            name,
            display_name,
            email,
            password,
        } => {
            let body = UserFields {
                name: None,
                display_name,
                email,
                password,
            };
            let user: UserInfo = client.put(&format!("/api/users/{}", name), &body).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("User {} updated", user.name)),
                _ => output::print_item(&user, format)?,
            }
        }

        UserCommands::Delete { name, force } => {
            if !force {
                output::print_info("This will delete the user. Use --force to skip confirmation.");
                return Ok(());
            }

            let resp: serde_json::Value = client.delete(&format!("/api/users/{}", name)).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("User {} deleted", name)),
                _ => output::print_item(&resp, format)?,
            }
        }

        UserCommands::AssignRole { user, role } => {
            let change: RoleChange = client
                .post(
                    &format!("/api/users/{}/roles", user),
                    &serde_json::json!({ "role": role }),
                )
                .await?;
            report_change(&change, "assigned to", format)?;
        }

        UserCommands::RemoveRole { user, role } => {
            let change: RoleChange = client
                .delete(&format!("/api/users/{}/roles/{}", user, role))
                .await?;
            report_change(&change, "removed from", format)?;
        }
    }

    Ok(())
}

fn report_change(change: &RoleChange, verb: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_success(&format!("Role {} {} {}", change.role, verb, change.user));
            if !change.synced {
                output::print_warning(
                    "Policy was not re-synced; run `portcullis rbac sync` to apply it now",
                );
            }
            Ok(())
        }
        _ => output::print_item(change, format),
    }
}
