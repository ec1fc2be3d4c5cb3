//! Policy sync and status commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RbacCommands {
    /// Rebuild the policy from the identity directory
    Sync,

    /// Show the installed policy snapshot
    Status,
}

#[derive(Debug, Deserialize, Serialize)]
struct SyncReport {
    grants: usize,
    assignments: usize,
    #[serde(default)]
    skipped_roles: Vec<String>,
    #[serde(default)]
    dropped_assignments: usize,
    fingerprint: String,
    version: u64,
    #[serde(default)]
    persisted: bool,
    duration_ms: u64,
    completed_at: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct PolicyStatus {
    domain: String,
    version: u64,
    grants: usize,
    assignments: usize,
    roles: usize,
    fingerprint: String,
    installed_at: String,
    sync_running: bool,
    #[serde(default)]
    last_sync: Option<SyncReport>,
}

pub async fn execute(cmd: RbacCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RbacCommands::Sync => {
            let report: SyncReport = client.post("/api/rbac/sync", &serde_json::json!({})).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Policy synced in {}ms (version {})",
                        report.duration_ms, report.version
                    ));
                    output::print_detail("Grants", &report.grants.to_string());
                    output::print_detail("Assignments", &report.assignments.to_string());
                    output::print_detail("Fingerprint", &report.fingerprint);
                    if !report.skipped_roles.is_empty() {
                        output::print_warning(&format!(
                            "Roles without a permission template: {}",
                            report.skipped_roles.join(", ")
                        ));
                    }
                    if report.dropped_assignments > 0 {
                        output::print_warning(&format!(
                            "{} assignment(s) named unknown roles and were dropped",
                            report.dropped_assignments
                        ));
                    }
                }
                _ => output::print_item(&report, format)?,
            }
        }

        RbacCommands::Status => {
            let status: PolicyStatus = client.get("/api/rbac/status").await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Policy: {}", status.domain));
                    output::print_detail("Version", &status.version.to_string());
                    output::print_detail("Grants", &status.grants.to_string());
                    output::print_detail("Assignments", &status.assignments.to_string());
                    output::print_detail("Roles", &status.roles.to_string());
                    output::print_detail("Fingerprint", &status.fingerprint);
                    output::print_detail("Installed", &status.installed_at);
                    output::print_detail("Sync Running", &status.sync_running.to_string());
                    match &status.last_sync {
                        Some(last) => output::print_detail("Last Sync", &last.completed_at),
                        None => output::print_detail("Last Sync", "never"),
                    }
                }
                _ => output::print_item(&status, format)?,
            }
        }
    }

    Ok(())
}
