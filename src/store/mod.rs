//! Blob store
//!
//! The hierarchical store the reconciler works against. A store is split into
//! areas: the original upload (`Draft`, never modified), the staging scope,
//! and one bucket area per matched recipient.
//!
//! Two implementations ship with the crate: `MemoryStore` (an arena of
//! records, used by tests and previews) and `DiskStore` (directories on the
//! local filesystem).

pub mod archive;
pub mod disk;
pub mod item;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::identity::RecipientId;

pub use archive::{ExtractReport, ExtractStatus};
pub use disk::DiskStore;
pub use item::{display_path, split_path, ContentRef, StagedItem};
pub use memory::MemoryStore;

/// A partition of the blob store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    /// The original upload
    Draft,
    /// Working copy for one run
    Staging,
    /// Files claimed by one recipient
    Bucket(RecipientId),
}

impl Area {
    /// Whether writes to this area are refused
    pub fn is_read_only(&self) -> bool {
        matches!(self, Area::Draft)
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly(self.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Area::Draft => write!(f, "draft area"),
            Area::Staging => write!(f, "staging area"),
            Area::Bucket(id) => write!(f, "bucket {}", id),
        }
    }
}

/// Operations the reconciler needs from a hierarchical blob store.
///
/// Paths are parent segments; the root is the empty slice. Listing methods
/// return records sorted by (path, name).
pub trait BlobStore {
    /// Direct children of a directory
    fn list_children(&self, area: &Area, dir: &[String]) -> Result<Vec<StagedItem>, StoreError>;

    /// Every file (not directory) below a directory, at any depth
    fn list_files_under(&self, area: &Area, dir: &[String]) -> Result<Vec<StagedItem>, StoreError>;

    /// Every record in an area, directories included
    fn list_area(&self, area: &Area) -> Result<Vec<StagedItem>, StoreError>;

    /// Recipients that currently have a bucket area
    fn bucket_areas(&self) -> Result<Vec<RecipientId>, StoreError>;

    /// Look up a single record
    fn find(&self, area: &Area, path: &[String], name: &str) -> Result<Option<StagedItem>, StoreError>;

    /// Copy a record from one area into the same location of another.
    /// Directories are created; files must not already exist at the target.
    fn copy_into(&mut self, from: &Area, item: &StagedItem, to: &Area) -> Result<StagedItem, StoreError>;

    /// Remove a file, or an empty directory
    fn delete(&mut self, area: &Area, item: &StagedItem) -> Result<(), StoreError>;

    /// Relocate a file within its area, returning the replacement record
    fn rename(
        &mut self,
        area: &Area,
        item: &StagedItem,
        new_path: &[String],
        new_name: &str,
    ) -> Result<StagedItem, StoreError>;

    /// Expand an archive into `dest`, never overwriting existing files.
    ///
    /// The whole archive is read before anything is written. When `dest` is
    /// the archive's own location, the archive record is removed so that the
    /// new directory can take its name.
    fn extract_archive_into(
        &mut self,
        area: &Area,
        dest: &[String],
        archive: &StagedItem,
    ) -> Result<ExtractReport, StoreError>;

    /// Create a directory (and any missing ancestors); existing is fine
    fn create_directory(&mut self, area: &Area, path: &[String]) -> Result<(), StoreError>;

    /// Read the bytes behind a file record
    fn read(&self, area: &Area, item: &StagedItem) -> Result<Vec<u8>, StoreError>;

    /// Remove every record in an area
    fn clear_area(&mut self, area: &Area) -> Result<(), StoreError>;

    /// MIME type of a record, guessed from its name
    fn mime_type(&self, item: &StagedItem) -> String {
        if item.is_directory {
            return "inode/directory".to_string();
        }
        archive::mime_type(&item.name)
    }

    /// Whether a record is an archive this store can expand
    fn is_archive(&self, item: &StagedItem) -> bool {
        !item.is_directory && archive::is_archive_name(&item.name)
    }

    /// Move a file into another area at the same location
    fn move_into(&mut self, from: &Area, item: &StagedItem, to: &Area) -> Result<StagedItem, StoreError> {
        let moved = self.copy_into(from, item, to)?;
        self.delete(from, item)?;
        Ok(moved)
    }
}
