//! Flat-file policy persistence.
//!
//! One tuple per line, comma separated:
//!
//! ```text
//! p, admin, acme, users, read
//! p, bob, acme, users, delete, deny
//! g, alice, admin, acme
//! ```
//!
//! The file is rewritten in full after every successful sync (temp file then
//! rename, so readers never see a partial file) and loaded at startup.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::models::{Effect, Grant, RoleAssignment};
use super::policy::PolicyError;
use super::store::{PolicySet, PolicySnapshot};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Policy file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Policy file {path} line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Location of the persisted policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFile {
    path: PathBuf,
}

impl PolicyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "policy".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Render a snapshot in file format, rows sorted.
    pub fn render(snapshot: &PolicySnapshot) -> String {
        let mut grants: Vec<String> = snapshot.grants().iter().map(|g| format!("p, {}", g)).collect();
        let mut assignments: Vec<String> = snapshot
            .assignments()
            .iter()
            .map(|a| format!("g, {}", a))
            .collect();
        grants.sort_unstable();
        assignments.sort_unstable();

        let mut out = String::new();
        for row in grants.iter().chain(assignments.iter()) {
            out.push_str(row);
            out.push('\n');
        }
        out
    }

    /// Replace the file with `snapshot`.
    pub async fn save(&self, snapshot: &PolicySnapshot) -> Result<(), PersistError> {
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, Self::render(snapshot))
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), version = snapshot.version(), "Policy file written");
        Ok(())
    }

    /// Read the file. `Ok(None)` when it does not exist yet.
    pub async fn load(&self) -> Result<Option<PolicySet>, PersistError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let set = self.parse(&contents)?;
        info!(
            path = %self.path.display(),
            grants = set.grants.len(),
            assignments = set.assignments.len(),
            "Policy file loaded"
        );
        Ok(Some(set))
    }

    fn parse(&self, contents: &str) -> Result<PolicySet, PersistError> {
        let mut grants = Vec::new();
        let mut assignments = Vec::new();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_error = |reason: String| PersistError::Parse {
                path: self.path.clone(),
                line: idx + 1,
                reason,
            };

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                ["p", sub, dom, obj, act] => {
                    grants.push(Grant::allow(*sub, *dom, *obj, *act).map_err(|e| parse_error(e.to_string()))?)
                }
                ["p", sub, dom, obj, act, eft] => {
                    let effect = match *eft {
                        "allow" => Effect::Allow,
                        "deny" => Effect::Deny,
                        other => return Err(parse_error(format!("unknown effect '{}'", other))),
                    };
                    grants.push(
                        Grant::with_effect(*sub, *dom, *obj, *act, effect)
                            .map_err(|e: PolicyError| parse_error(e.to_string()))?,
                    )
                }
                ["g", user, role, dom] => {
                    if [user, role, dom].iter().any(|f| f.is_empty()) {
                        return Err(parse_error("empty field in role assignment".to_string()));
                    }
                    assignments.push(RoleAssignment::new(*user, *role, *dom))
                }
                _ => return Err(parse_error(format!("unrecognized policy line '{}'", line))),
            }
        }

        Ok(PolicySet::new(grants, assignments))
    }
}
