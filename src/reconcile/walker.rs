//! Breadth-first dispatch into recipient buckets
//!
//! The staging tree is scanned level by level. The first node on any path
//! whose token names a recipient claims its whole subtree, so the shallowest
//! match wins and no file can reach two buckets. Unmatched directories are
//! queued for the next level; unmatched files stay put as leftovers.

use std::collections::{BTreeMap, VecDeque};

use crate::error::ReconcileError;
use crate::identity::{IdentifierResolver, RecipientId};
use crate::store::{Area, BlobStore, StagedItem};

/// Files claimed by one recipient, ordered by (path, name)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub recipient: RecipientId,
    pub files: Vec<StagedItem>,
}

impl Bucket {
    pub fn area(&self) -> Area {
        Area::Bucket(self.recipient)
    }
}

pub type Buckets = BTreeMap<RecipientId, Bucket>;

/// Walk staging from the root, moving every matched subtree into its bucket
pub fn walk<S: BlobStore + ?Sized>(
    store: &mut S,
    resolver: &IdentifierResolver,
) -> Result<Buckets, ReconcileError> {
    let mut buckets = Buckets::new();
    let mut queue: VecDeque<Vec<String>> = VecDeque::new();
    queue.push_back(Vec::new());

    while let Some(dir) = queue.pop_front() {
        for child in store.list_children(&Area::Staging, &dir)? {
            let Some(recipient) = resolver.resolve(&child) else {
                if child.is_directory {
                    queue.push_back(child.full_path());
                }
                continue;
            };
            let id = recipient.id;

            let claimed = if child.is_directory {
                store.list_files_under(&Area::Staging, &child.full_path())?
            } else {
                vec![child.clone()]
            };
            tracing::debug!(
                "{} matches recipient {} ({} file(s))",
                child.display_path(),
                id,
                claimed.len()
            );

            for file in claimed {
                let moved = dispatch(store, &file, id)?;
                buckets
                    .entry(id)
                    .or_insert_with(|| Bucket {
                        recipient: id,
                        files: Vec::new(),
                    })
                    .files
                    .push(moved);
            }
        }
    }

    for bucket in buckets.values_mut() {
        bucket
            .files
            .sort_by(|a, b| (&a.path, &a.name).cmp(&(&b.path, &b.name)));
    }
    Ok(buckets)
}

/// Move one file into a bucket at its full staging path, replacing stale data
fn dispatch<S: BlobStore + ?Sized>(
    store: &mut S,
    file: &StagedItem,
    recipient: RecipientId,
) -> Result<StagedItem, ReconcileError> {
    let area = Area::Bucket(recipient);
    if let Some(stale) = store.find(&area, &file.path, &file.name)? {
        if !stale.is_directory {
            tracing::warn!("Replacing stale {} in {}", stale.display_path(), area);
            store.delete(&area, &stale)?;
        }
    }
    Ok(store.move_into(&Area::Staging, file, &area)?)
}
