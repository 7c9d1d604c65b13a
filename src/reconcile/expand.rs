//! Top-level archive expansion
//!
//! Only entries directly under the staging root are considered. An archive
//! whose name (minus extension) resolves to a recipient is that recipient's
//! submission and stays packed; any other archive is unpacked into a
//! directory carrying the archive's full file name.

use crate::error::{ReconcileError, StoreError};
use crate::identity::IdentifierResolver;
use crate::store::{display_path, Area, BlobStore, ExtractStatus, StagedItem};

/// Expand every eligible archive at depth 0. Returns the names expanded.
///
/// An overwrite aborts the run with `Conflict`; whatever was already
/// extracted stays in staging for inspection.
pub fn expand_top_level<S: BlobStore + ?Sized>(
    store: &mut S,
    resolver: &IdentifierResolver,
) -> Result<Vec<String>, ReconcileError> {
    let mut expanded = Vec::new();

    for item in store.list_children(&Area::Staging, &[])? {
        if !store.is_archive(&item) {
            continue;
        }
        if let Some(recipient) = resolver.resolve(&item) {
            tracing::debug!("Keeping {} packed for recipient {}", item.name, recipient.id);
            continue;
        }

        expand_one(store, &item)?;
        expanded.push(item.name.clone());
    }

    if !expanded.is_empty() {
        tracing::info!("Expanded {} archive(s): {}", expanded.len(), expanded.join(", "));
    }
    Ok(expanded)
}

fn expand_one<S: BlobStore + ?Sized>(store: &mut S, archive: &StagedItem) -> Result<(), ReconcileError> {
    let dest = archive.full_path();
    let report = store
        .extract_archive_into(&Area::Staging, &dest, archive)
        .map_err(|e| match e {
            StoreError::Zip(zip) => ReconcileError::Archive {
                archive: archive.display_path(),
                reason: zip.to_string(),
            },
            other => other.into(),
        })?;

    if let Some((entry, _)) = report.iter().find(|(_, s)| **s == ExtractStatus::Unsafe) {
        return Err(ReconcileError::Archive {
            archive: archive.display_path(),
            reason: format!("entry '{}' escapes the archive directory", entry),
        });
    }
    if let Some((entry, _)) = report
        .iter()
        .find(|(_, s)| **s == ExtractStatus::WouldOverwrite)
    {
        let segments: Vec<String> = crate::store::split_path(entry);
        let mut target = dest.clone();
        target.extend(segments);
        let name = target.pop().unwrap_or_default();
        return Err(ReconcileError::Conflict {
            archive: archive.display_path(),
            path: display_path(&target, &name),
        });
    }

    // Stores that extract onto the archive's own name consume it already
    if let Some(left) = store.find(&Area::Staging, &archive.path, &archive.name)? {
        if !left.is_directory {
            store.delete(&Area::Staging, &left)?;
        }
    }

    tracing::debug!("Expanded {} ({} entries)", archive.display_path(), report.len());
    Ok(())
}
