//! Portcullis CLI - Command-line interface for administering a Portcullis gateway.
//!
//! Provides commands for policy sync, users, roles, health, and configuration.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, rbac, roles, users};
use output::OutputFormat;

/// Portcullis - RBAC gateway CLI
#[derive(Parser)]
#[command(
    name = "portcullis",
    version,
    about = "Portcullis - RBAC gateway administration",
    long_about = "CLI tool for syncing policy and managing users and roles through a Portcullis gateway.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Gateway URL
    #[arg(long, global = true, env = "PORTCULLIS_API_URL")]
    api_url: Option<String>,

    /// Bearer token issued by the identity directory
    #[arg(long, global = true, env = "PORTCULLIS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Policy sync and status
    #[command(subcommand)]
    Rbac(rbac::RbacCommands),

    /// User management
    #[command(subcommand)]
    Users(users::UserCommands),

    /// Role management
    #[command(subcommand)]
    Roles(roles::RoleCommands),

    /// Check gateway health
    Health,

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let stored = config::CliConfig::load().unwrap_or_default();
    let api_url = cli
        .api_url
        .clone()
        .or(stored.api_url)
        .unwrap_or_else(|| "http://localhost:9000".to_string());
    let token = cli.token.clone().or(stored.token);

    let client = client::ApiClient::new(&api_url, token)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Rbac(cmd) => rbac::execute(cmd, &client, format).await,
        Commands::Users(cmd) => users::execute(cmd, &client, format).await,
        Commands::Roles(cmd) => roles::execute(cmd, &client, format).await,
        Commands::Health => health::execute(&client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
