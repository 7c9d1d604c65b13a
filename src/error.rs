//! Error types
//!
//! `ReconcileError` covers everything that can abort a reconciliation run.
//! Per-recipient sink problems are deliberately not errors: they travel as
//! `SinkNotices` and end up in the run report.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::Area;

/// Errors raised by a blob store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The referenced item does not exist in the area
    #[error("no such item in {area}: {path}")]
    NotFound { area: Area, path: String },

    /// A rename or copy target is already occupied
    #[error("target already exists in {area}: {path}")]
    AlreadyExists { area: Area, path: String },

    /// Directory still has children
    #[error("directory is not empty in {area}: {path}")]
    NotEmpty { area: Area, path: String },

    /// Operation the store does not support for this kind of record
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The area may not be modified (the original upload)
    #[error("{0} is read-only")]
    ReadOnly(Area),

    /// Archive could not be opened or read
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Fatal errors for a reconciliation run
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Archive expansion would overwrite an existing path
    #[error("expanding {archive} would overwrite existing path {path}")]
    Conflict { archive: String, path: String },

    /// Two recipients share the same non-empty identifier value
    #[error("identifier is not unique: multiple recipients match {field} = {value}")]
    AmbiguousIdentifier { field: String, value: String },

    /// Direct lookup for a token that matches no recipient
    #[error("{token} is not a submitter in this roster")]
    UnknownIdentifier { token: String },

    /// A bug: path bookkeeping disagreed with itself
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Archive could not be expanded safely
    #[error("cannot expand {archive}: {reason}")]
    Archive { archive: String, reason: String },

    /// The roster could not be loaded
    #[error("roster unavailable: {0}")]
    Roster(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Journal(#[from] crate::journal::JournalError),
}

impl ReconcileError {
    /// True for failures that indicate a defect rather than bad input
    pub fn is_bug(&self) -> bool {
        matches!(self, ReconcileError::InternalInvariant(_))
    }
}
