//! Staged item definitions
//!
//! A `StagedItem` is one record in a blob store area: a file or a directory
//! located by its parent path segments plus its own name. Records are values;
//! operations that move or rename an item hand back a replacement record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque handle to the bytes behind a file record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ContentRef {
    /// SHA-256 hex digest of content held by an in-memory store
    Digest(String),
    /// Location of the file on disk
    Disk(PathBuf),
}

/// A single file or directory record in a blob store area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedItem {
    /// Segments of the parent directory, root is empty
    pub path: Vec<String>,

    /// Name of the file or directory (basename)
    pub name: String,

    /// Whether this record is a directory
    pub is_directory: bool,

    /// Content handle (None for directories)
    pub content: Option<ContentRef>,
}

impl StagedItem {
    /// Create a file record
    pub fn file(path: Vec<String>, name: impl Into<String>, content: ContentRef) -> Self {
        Self {
            path,
            name: name.into(),
            is_directory: false,
            content: Some(content),
        }
    }

    /// Create a directory record
    pub fn directory(path: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            path,
            name: name.into(),
            is_directory: true,
            content: None,
        }
    }

    /// Path segments of this item including its own name
    pub fn full_path(&self) -> Vec<String> {
        let mut full = self.path.clone();
        full.push(self.name.clone());
        full
    }

    /// Number of parent segments (0 = directly under the root)
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// File name without its extension.
    ///
    /// Only the text after the last dot counts as extension, and a name whose
    /// only dot is the leading one has an empty stem.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) => &self.name[..idx],
            None => &self.name,
        }
    }

    /// Extension without the leading dot (empty if there is none)
    pub fn extension(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) => &self.name[idx + 1..],
            None => "",
        }
    }

    /// Display form used in reports, e.g. `/q/user01/submission.txt`
    pub fn display_path(&self) -> String {
        display_path(&self.path, &self.name)
    }
}

/// Render parent segments plus a name as an absolute slash path
pub fn display_path(path: &[String], name: &str) -> String {
    let mut out = String::from("/");
    for segment in path {
        out.push_str(segment);
        out.push('/');
    }
    out.push_str(name);
    out
}

/// Split a slash path into segments, ignoring empty components
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
