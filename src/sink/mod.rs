//! Submission sinks
//!
//! A sink receives each recipient's final file set and replaces whatever that
//! recipient had submitted before. Problems with one recipient are reported
//! as notices rather than errors so the other recipients still go through.

pub mod directory;

use serde::{Deserialize, Serialize};

use crate::identity::Recipient;
use crate::store::display_path;

pub use directory::{DirectorySink, SubmissionPolicy};

/// One file of a final submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFile {
    pub path: Vec<String>,
    pub name: String,
    pub content: Vec<u8>,
}

impl SubmissionFile {
    pub fn display_path(&self) -> String {
        display_path(&self.path, &self.name)
    }
}

/// Human-readable problems a sink hit for one recipient
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkNotices(pub Vec<String>);

impl SinkNotices {
    pub fn single(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// Destination for committed submissions
pub trait SubmissionSink {
    /// Replace the recipient's submission with exactly `files`
    fn replace_submission(
        &mut self,
        recipient: &Recipient,
        files: &[SubmissionFile],
    ) -> Result<(), SinkNotices>;
}

/// Side channel told about every successful replacement
pub trait AuxiliaryHook {
    fn submission_replaced(&self, recipient: &Recipient, files: &[SubmissionFile]) -> Result<(), String>;
}

/// Hook that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHook;

impl AuxiliaryHook for LogHook {
    fn submission_replaced(&self, recipient: &Recipient, files: &[SubmissionFile]) -> Result<(), String> {
        tracing::info!(
            "Submission replaced for {} ({}): {} file(s)",
            recipient.full_name,
            recipient.id,
            files.len()
        );
        Ok(())
    }
}
