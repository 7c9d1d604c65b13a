//! Bulk submission reconciler
//!
//! Takes one arbitrarily nested upload of files, folders and zip archives,
//! matches it against a roster by an identifying token embedded in file and
//! folder names, and produces one flattened file set per recipient plus a
//! report of whatever could not be matched.

pub mod config;
pub mod error;
pub mod identity;
pub mod journal;
pub mod reconcile;
pub mod sink;
pub mod store;

pub use config::{ConfigError, ReconcileConfig};
pub use error::{ReconcileError, StoreError};
pub use identity::{
    IdentifierField, IdentifierResolver, JsonRoster, Recipient, RecipientId, RosterSource,
    StaticRoster,
};
pub use journal::{JournalError, RunJournal, RunRecord, ScopeLock};
pub use reconcile::{Reconciler, RunReport, RunRequest, RunState};
pub use sink::{AuxiliaryHook, DirectorySink, LogHook, SinkNotices, SubmissionPolicy, SubmissionSink};
pub use store::{Area, BlobStore, DiskStore, MemoryStore, StagedItem};

use tracing_subscriber::EnvFilter;

/// Load `.env` from the working directory, falling back to its parent
pub fn load_env() {
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }
}

/// Install the global tracing subscriber.
///
/// Filter comes from RUST_LOG, defaulting to warn for dependencies and info
/// for this crate (state transitions and run summaries). Output goes to
/// stderr so reports on stdout stay machine readable.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,assign_bulk=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
