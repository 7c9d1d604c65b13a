//! Run journal
//!
//! Persists the last reached state of a reconciliation run per scope key, so
//! an interrupted or failed run can be inspected and retried. Records are
//! JSON files under the journal directory:
//!
//! ```text
//! <journal_dir>/<scope stem>.run.json
//! <journal_dir>/<scope stem>.run.lock
//! ```
//!
//! ## Concurrency Safety
//! Runs against the same scope must not interleave. `ScopeLock` holds an
//! exclusive fs2 lock on the scope's lock file for as long as it lives.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::reconcile::RunState;

const STEM_PREFIX_CHARS: usize = 48;

/// Error type for journal operations
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal record is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another run holds the scope
    #[error("scope '{0}' is locked by another run")]
    Locked(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> JournalError + '_ {
    move |source| JournalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// Journal entry for the most recent run against a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: Uuid,
    pub scope: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transitions: Vec<Transition>,
    /// Fatal error that ended the run, if any
    pub failure: Option<String>,
}

impl RunRecord {
    pub fn new(scope: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            scope: scope.into(),
            state: RunState::Started,
            started_at: now,
            updated_at: now,
            transitions: vec![Transition {
                state: RunState::Started,
                at: now,
            }],
            failure: None,
        }
    }

    pub fn advance(&mut self, state: RunState) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        self.transitions.push(Transition { state, at: now });
    }

    /// Record a fatal error against the current state
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Whether the run reached an end state without failing
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.state.is_terminal()
    }
}

/// File name stem for a scope key.
///
/// A readable prefix followed by the first 16 hex digits of the key's
/// SHA-256, so keys that sanitize to the same prefix still get distinct
/// stems.
pub(crate) fn scope_file_stem(scope: &str) -> String {
    let readable: String = scope
        .chars()
        .take(STEM_PREFIX_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = hex::encode(Sha256::digest(scope.as_bytes()));
    format!("{}-{}", readable, &digest[..16])
}

/// Directory of run records
#[derive(Debug, Clone)]
pub struct RunJournal {
    dir: PathBuf,
}

impl RunJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location (~/.local/share/assign-bulk/journal on Linux)
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("assign-bulk")
            .join("journal")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<(), JournalError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))
    }

    fn record_path(&self, scope: &str) -> PathBuf {
        self.dir.join(format!("{}.run.json", scope_file_stem(scope)))
    }

    /// Create and persist a fresh record for a scope
    pub fn start(&self, scope: &str) -> Result<RunRecord, JournalError> {
        let record = RunRecord::new(scope);
        self.save(&record)?;
        Ok(record)
    }

    /// Save a record.
    ///
    /// Writes to a temp file first, then renames, so a record on disk is
    /// never half written.
    pub fn save(&self, record: &RunRecord) -> Result<(), JournalError> {
        self.ensure_dir()?;

        let path = self.record_path(&record.scope);
        let temp_path = self
            .dir
            .join(format!("{}.run.tmp", scope_file_stem(&record.scope)));

        let json = serde_json::to_string_pretty(record)?;
        fs::write(&temp_path, &json).map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &path).map_err(io_err(&path))?;

        tracing::debug!("Journaled run {} at {}", record.run_id, record.state);
        Ok(())
    }

    /// Load the record for a scope, if one exists
    pub fn load(&self, scope: &str) -> Result<Option<RunRecord>, JournalError> {
        let path = self.record_path(scope);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).map_err(io_err(&path))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Remove the record for a scope
    pub fn discard(&self, scope: &str) -> Result<(), JournalError> {
        let path = self.record_path(scope);
        if path.exists() {
            fs::remove_file(&path).map_err(io_err(&path))?;
        }
        Ok(())
    }

    /// Every record that failed or stopped short of an end state.
    ///
    /// Unreadable files are skipped.
    pub fn incomplete_runs(&self) -> Result<Vec<RunRecord>, JournalError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(".run.json"))
                .unwrap_or(false)
            {
                continue;
            }

            let Ok(json) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<RunRecord>(&json) {
                Ok(record) if !record.is_complete() => records.push(record),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable journal {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(records)
    }
}

/// Exclusive hold on one scope key, released on drop
#[derive(Debug)]
pub struct ScopeLock {
    file: File,
    path: PathBuf,
}

impl ScopeLock {
    /// Take the lock without waiting; fails with `Locked` if another run has it
    pub fn acquire(dir: &Path, scope: &str) -> Result<Self, JournalError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;

        let path = dir.join(format!("{}.run.lock", scope_file_stem(scope)));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err(&path))?;

        file.try_lock_exclusive()
            .map_err(|_| JournalError::Locked(scope.to_string()))?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopeLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
