//! Empty directory pruning
//!
//! After simplification a bucket still holds the directory records of the
//! paths its files used to live at. Everything not an ancestor of a final
//! file is removed, deepest first.

use std::collections::HashSet;

use crate::error::ReconcileError;
use crate::store::{Area, BlobStore, StagedItem};

/// Remove directories in `area` that no file in `files` needs. Returns the
/// number removed.
pub fn prune_empty_directories<S: BlobStore + ?Sized>(
    store: &mut S,
    area: &Area,
    files: &[StagedItem],
) -> Result<usize, ReconcileError> {
    let required: HashSet<&[String]> = files
        .iter()
        .flat_map(|f| (1..=f.path.len()).map(move |n| &f.path[..n]))
        .collect();

    let mut doomed: Vec<StagedItem> = store
        .list_area(area)?
        .into_iter()
        .filter(|item| item.is_directory && !required.contains(item.full_path().as_slice()))
        .collect();
    doomed.sort_by_key(|d| std::cmp::Reverse(d.depth()));

    for dir in &doomed {
        store.delete(area, dir)?;
    }

    if !doomed.is_empty() {
        tracing::debug!("Pruned {} empty director(ies) from {}", doomed.len(), area);
    }
    Ok(doomed.len())
}
