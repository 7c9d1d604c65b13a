//! Bulk submission reconciliation
//!
//! Turns one nested upload into a flattened file set per recipient:
//!
//! 1. `expand`: unpack top-level archives that do not name a recipient
//! 2. `walker`: breadth-first dispatch of matched subtrees into buckets
//! 3. `simplify`: per-bucket path compression
//! 4. `prune`: drop directories no longer backing any file
//!
//! `Reconciler` sequences these and hands the result to a submission sink.

pub mod engine;
pub mod expand;
pub mod prune;
pub mod report;
pub mod simplify;
pub mod walker;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use engine::{Reconciler, RunRequest};
pub use report::{RecipientReport, RunReport};
pub use walker::{Bucket, Buckets};

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Started,
    /// Stale scope data cleared and the upload copied in
    Staged,
    Expanded,
    Walked,
    PerBucketSimplified,
    Reported,
    Committed,
    Previewed,
    /// Staging and bucket areas removed
    Cleaned,
}

impl RunState {
    /// States a successful run may end in
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Committed | RunState::Previewed | RunState::Cleaned
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Started => "started",
            RunState::Staged => "staged",
            RunState::Expanded => "expanded",
            RunState::Walked => "walked",
            RunState::PerBucketSimplified => "per_bucket_simplified",
            RunState::Reported => "reported",
            RunState::Committed => "committed",
            RunState::Previewed => "previewed",
            RunState::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}
