//! Configuration
//!
//! Settings come from, in increasing precedence: built-in defaults under the
//! platform data directory, an optional JSON file, `ASSIGN_BULK_*`
//! environment variables (a `.env` file is loaded by the binary), and
//! finally command line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::identity::IdentifierField;
use crate::journal::{scope_file_stem, RunJournal};
use crate::sink::SubmissionPolicy;

pub const ENV_STAGING_ROOT: &str = "ASSIGN_BULK_STAGING_ROOT";
pub const ENV_SUBMISSIONS_ROOT: &str = "ASSIGN_BULK_SUBMISSIONS_ROOT";
pub const ENV_JOURNAL_DIR: &str = "ASSIGN_BULK_JOURNAL_DIR";
pub const ENV_IDENTIFIER: &str = "ASSIGN_BULK_IDENTIFIER";
pub const ENV_MAX_FILES: &str = "ASSIGN_BULK_MAX_FILES";
pub const ENV_MAX_FILE_BYTES: &str = "ASSIGN_BULK_MAX_FILE_BYTES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// Parent of every scope's staging and bucket areas
    pub staging_root: PathBuf,
    /// Where `DirectorySink` keeps committed submissions, one directory per scope
    pub submissions_root: PathBuf,
    pub journal_dir: PathBuf,
    pub identifier_field: IdentifierField,
    pub policy: SubmissionPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("assign-bulk");
        Self {
            staging_root: base.join("scopes"),
            submissions_root: base.join("submissions"),
            journal_dir: RunJournal::default_dir(),
            identifier_field: IdentifierField::default(),
            policy: SubmissionPolicy::default(),
        }
    }
}

impl ReconcileConfig {
    /// Defaults (or `path`), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Read a JSON config file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment variables found by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STAGING_ROOT) {
            self.staging_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_SUBMISSIONS_ROOT) {
            self.submissions_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_JOURNAL_DIR) {
            self.journal_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_IDENTIFIER) {
            self.identifier_field = value.parse().map_err(|e: crate::identity::UnknownField| {
                ConfigError::InvalidEnv {
                    var: ENV_IDENTIFIER,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_FILES) {
            self.policy.max_files = Some(parse_number(ENV_MAX_FILES, &value)?);
        }
        if let Some(value) = lookup(ENV_MAX_FILE_BYTES) {
            self.policy.max_file_bytes = Some(parse_number(ENV_MAX_FILE_BYTES, &value)?);
        }
        Ok(())
    }

    /// Working directory for one scope key
    pub fn scope_root(&self, scope: &str) -> PathBuf {
        self.staging_root.join(scope_file_stem(scope))
    }

    /// Committed submissions for one scope key
    pub fn submission_root(&self, scope: &str) -> PathBuf {
        self.submissions_root.join(scope_file_stem(scope))
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
