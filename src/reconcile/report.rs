//! Run report returned to the uploader

use serde::{Deserialize, Serialize};

use crate::identity::RecipientId;

/// Outcome for one matched recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientReport {
    pub recipient_id: RecipientId,
    pub full_name: String,
    pub matched_file_paths: Vec<String>,
    /// The sink accepted these files as the recipient's submission
    pub committed: bool,
    /// Problems the sink reported for this recipient; set instead of `committed`
    pub notices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// True when nothing was handed to the sink
    pub preview: bool,
    pub recipients: Vec<RecipientReport>,
    /// Files no recipient claimed
    pub unmatched_paths: Vec<String>,
    /// Staging was kept because of unmatched files
    pub staging_preserved: bool,
}

impl RunReport {
    pub fn has_unmatched(&self) -> bool {
        !self.unmatched_paths.is_empty()
    }

    pub fn recipient(&self, id: RecipientId) -> Option<&RecipientReport> {
        self.recipients.iter().find(|r| r.recipient_id == id)
    }

    /// Recipients the sink complained about
    pub fn with_notices(&self) -> impl Iterator<Item = &RecipientReport> {
        self.recipients.iter().filter(|r| !r.notices.is_empty())
    }
}
