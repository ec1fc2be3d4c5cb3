//! Configuration management commands.
//!
//! The gateway URL and bearer token can be stored in
//! `~/.portcullis/config.toml` so they need not be passed on every call.
//! Command-line flags and environment variables still take precedence.

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Store a value
    Set { key: ConfigKey, value: String },

    /// Print a stored value
    Get {
        key: ConfigKey,

        /// Print the token in full
        #[arg(long)]
        reveal: bool,
    },

    /// Show every stored value
    Show,

    /// Forget all stored values
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Keys the CLI knows how to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    ApiUrl,
    Token,
}

impl ConfigKey {
    fn name(self) -> &'static str {
        match self {
            Self::ApiUrl => "api-url",
            Self::Token => "token",
        }
    }
}

/// Settings persisted between invocations.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl CliConfig {
    fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".portcullis").join("config.toml"))
    }

    /// Read the stored settings; a missing file is an empty config.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn get(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::ApiUrl => self.api_url.as_deref(),
            ConfigKey::Token => self.token.as_deref(),
        }
    }

    fn set(&mut self, key: ConfigKey, value: String) -> Result<()> {
        let value = value.trim().to_string();
        if value.is_empty() {
            bail!("{} must not be empty", key.name());
        }
        match key {
            ConfigKey::ApiUrl => {
                let url = Url::parse(&value).with_context(|| format!("'{}' is not a URL", value))?;
                if !matches!(url.scheme(), "http" | "https") {
                    bail!("api-url must use http or https, got '{}'", url.scheme());
                }
                self.api_url = Some(value.trim_end_matches('/').to_string());
            }
            ConfigKey::Token => self.token = Some(value),
        }
        Ok(())
    }

    /// Stored values with the token shortened.
    fn masked(&self) -> Vec<(&'static str, String)> {
        [ConfigKey::ApiUrl, ConfigKey::Token]
            .into_iter()
            .filter_map(|key| self.get(key).map(|v| (key.name(), mask(key, v))))
            .collect()
    }
}

fn mask(key: ConfigKey, value: &str) -> String {
    match key {
        ConfigKey::Token if value.chars().count() > 8 => {
            format!("{}...", value.chars().take(8).collect::<String>())
        }
        _ => value.to_string(),
    }
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = CliConfig::load()?;
            cfg.set(key, value)?;
            cfg.save()?;
            let shown = cfg.get(key).map(|v| mask(key, v)).unwrap_or_default();
            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key.name(), shown)),
                _ => output::print_item(&serde_json::json!({ "key": key.name(), "value": shown }), format)?,
            }
        }

        ConfigCommands::Get { key, reveal } => {
            let cfg = CliConfig::load()?;
            let Some(value) = cfg.get(key) else {
                bail!("{} is not set", key.name());
            };
            let shown = if reveal { value.to_string() } else { mask(key, value) };
            match format {
                OutputFormat::Table => println!("{}", shown),
                _ => output::print_item(&serde_json::json!({ "key": key.name(), "value": shown }), format)?,
            }
        }

        ConfigCommands::Show => {
            let entries = CliConfig::load()?.masked();
            if entries.is_empty() {
                output::print_info("No configuration values set.");
                return Ok(());
            }
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for (k, v) in &entries {
                        output::print_detail(k, v);
                    }
                }
                _ => {
                    let map: serde_json::Map<String, serde_json::Value> = entries
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.into()))
                        .collect();
                    output::print_item(&map, format)?;
                }
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will forget the stored URL and token. Use --force to confirm.");
                return Ok(());
            }
            let path = CliConfig::path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::print_success("Configuration reset");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_is_validated() {
        let mut cfg = CliConfig::default();
        assert!(cfg.set(ConfigKey::ApiUrl, "not a url".into()).is_err());
        assert!(cfg.set(ConfigKey::ApiUrl, "ftp://gateway".into()).is_err());

        cfg.set(ConfigKey::ApiUrl, "https://gateway.acme.test/".into()).unwrap();
        assert_eq!(cfg.get(ConfigKey::ApiUrl), Some("https://gateway.acme.test"));
    }

    #[test]
    fn test_token_is_masked() {
        let mut cfg = CliConfig::default();
        cfg.set(ConfigKey::Token, "eyJhbGciOiJSUzI1NiJ9.payload".into()).unwrap();

        assert_eq!(cfg.masked(), vec![("token", "eyJhbGci...".to_string())]);
        assert_eq!(mask(ConfigKey::Token, "short"), "short");
        assert!(cfg.set(ConfigKey::Token, "  ".into()).is_err());
    }

    #[test]
    fn test_toml_uses_kebab_keys() {
        let cfg: CliConfig = toml::from_str("api-url = \"http://localhost:9000\"\n").unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(cfg.token, None);
    }
}
