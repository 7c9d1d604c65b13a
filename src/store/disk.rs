//! Filesystem-backed blob store
//!
//! The draft area is the upload directory itself and is only ever read.
//! Staging and bucket areas live under a per-scope root:
//!
//! ```text
//! <scope_root>/staging/...
//! <scope_root>/buckets/<recipient id>/...
//! ```
//!
//! Symlinks are never followed or copied.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::archive::{self, ExtractReport, ExtractStatus};
use super::item::{display_path, ContentRef, StagedItem};
use super::{Area, BlobStore};
use crate::error::StoreError;
use crate::identity::RecipientId;

const STAGING_DIR: &str = "staging";
const BUCKETS_DIR: &str = "buckets";

/// Blob store over local directories
#[derive(Debug, Clone)]
pub struct DiskStore {
    upload_dir: PathBuf,
    scope_root: PathBuf,
}

impl DiskStore {
    /// Create a store reading uploads from `upload_dir` and working under `scope_root`
    pub fn new(upload_dir: impl Into<PathBuf>, scope_root: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            scope_root: scope_root.into(),
        }
    }

    /// Directory backing an area
    pub fn area_dir(&self, area: &Area) -> PathBuf {
        match area {
            Area::Draft => self.upload_dir.clone(),
            Area::Staging => self.scope_root.join(STAGING_DIR),
            Area::Bucket(id) => self.scope_root.join(BUCKETS_DIR).join(id.to_string()),
        }
    }

    fn locate_dir(&self, area: &Area, path: &[String]) -> PathBuf {
        let mut location = self.area_dir(area);
        for segment in path {
            location.push(segment);
        }
        location
    }

    fn locate(&self, area: &Area, path: &[String], name: &str) -> PathBuf {
        self.locate_dir(area, path).join(name)
    }

    fn record(path: Vec<String>, name: String, is_directory: bool, location: &Path) -> StagedItem {
        if is_directory {
            StagedItem::directory(path, name)
        } else {
            StagedItem::file(path, name, ContentRef::Disk(location.to_path_buf()))
        }
    }

    /// Walk an area below `dir`, sorted by (path, name)
    fn walk(&self, area: &Area, dir: &[String], files_only: bool) -> Result<Vec<StagedItem>, StoreError> {
        let root = self.area_dir(area);
        let base = self.locate_dir(area, dir);
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(&base).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                StoreError::io(path, source)
            })?;

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                tracing::warn!("Skipping symlink {}", entry.path().display());
                continue;
            }
            if files_only && file_type.is_dir() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(|_| StoreError::NotFound {
                    area: area.clone(),
                    path: entry.path().display().to_string(),
                })?;
            let mut segments: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let name = segments.pop().unwrap_or_default();
            items.push(Self::record(segments, name, file_type.is_dir(), entry.path()));
        }

        items.sort_by(|a, b| (&a.path, &a.name).cmp(&(&b.path, &b.name)));
        Ok(items)
    }

    /// Whether a file sits at `target` or at one of its ancestors below `base`
    fn blocked_by_file(base: &Path, target: &Path) -> bool {
        target
            .ancestors()
            .take_while(|p| *p != base && p.starts_with(base))
            .any(|p| p.is_file())
    }

    fn create_parent(path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        Ok(())
    }
}

impl BlobStore for DiskStore {
    fn list_children(&self, area: &Area, dir: &[String]) -> Result<Vec<StagedItem>, StoreError> {
        let base = self.locate_dir(area, dir);
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&base).map_err(|e| StoreError::io(&base, e))?;
        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&base, e))?;
            let file_type = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?;
            if file_type.is_symlink() {
                tracing::warn!("Skipping symlink {}", entry.path().display());
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            items.push(Self::record(dir.to_vec(), name, file_type.is_dir(), &entry.path()));
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn list_files_under(&self, area: &Area, dir: &[String]) -> Result<Vec<StagedItem>, StoreError> {
        self.walk(area, dir, true)
    }

    fn list_area(&self, area: &Area) -> Result<Vec<StagedItem>, StoreError> {
        self.walk(area, &[], false)
    }

    fn bucket_areas(&self) -> Result<Vec<RecipientId>, StoreError> {
        let buckets = self.scope_root.join(BUCKETS_DIR);
        if !buckets.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&buckets).map_err(|e| StoreError::io(&buckets, e))?;
        let mut ids: Vec<RecipientId> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_string_lossy().parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn find(&self, area: &Area, path: &[String], name: &str) -> Result<Option<StagedItem>, StoreError> {
        let location = self.locate(area, path, name);
        match fs::symlink_metadata(&location) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(None),
            Ok(meta) => Ok(Some(Self::record(
                path.to_vec(),
                name.to_string(),
                meta.is_dir(),
                &location,
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(location, e)),
        }
    }

    fn copy_into(&mut self, from: &Area, item: &StagedItem, to: &Area) -> Result<StagedItem, StoreError> {
        to.ensure_writable()?;
        let source = self.locate(from, &item.path, &item.name);
        if !source.exists() {
            return Err(StoreError::NotFound {
                area: from.clone(),
                path: item.display_path(),
            });
        }

        let target = self.locate(to, &item.path, &item.name);
        if item.is_directory {
            fs::create_dir_all(&target).map_err(|e| StoreError::io(&target, e))?;
            return Ok(item.clone());
        }

        if target.exists() {
            return Err(StoreError::AlreadyExists {
                area: to.clone(),
                path: item.display_path(),
            });
        }
        Self::create_parent(&target)?;
        fs::copy(&source, &target).map_err(|e| StoreError::io(&target, e))?;

        Ok(Self::record(item.path.clone(), item.name.clone(), false, &target))
    }

    fn delete(&mut self, area: &Area, item: &StagedItem) -> Result<(), StoreError> {
        area.ensure_writable()?;
        let location = self.locate(area, &item.path, &item.name);
        if !location.exists() {
            return Err(StoreError::NotFound {
                area: area.clone(),
                path: item.display_path(),
            });
        }

        if item.is_directory {
            let mut children = fs::read_dir(&location).map_err(|e| StoreError::io(&location, e))?;
            if children.next().is_some() {
                return Err(StoreError::NotEmpty {
                    area: area.clone(),
                    path: item.display_path(),
                });
            }
            fs::remove_dir(&location).map_err(|e| StoreError::io(&location, e))
        } else {
            fs::remove_file(&location).map_err(|e| StoreError::io(&location, e))
        }
    }

    fn rename(
        &mut self,
        area: &Area,
        item: &StagedItem,
        new_path: &[String],
        new_name: &str,
    ) -> Result<StagedItem, StoreError> {
        area.ensure_writable()?;
        if item.is_directory {
            return Err(StoreError::Unsupported(format!(
                "renaming directory {}",
                item.display_path()
            )));
        }

        let source = self.locate(area, &item.path, &item.name);
        if !source.is_file() {
            return Err(StoreError::NotFound {
                area: area.clone(),
                path: item.display_path(),
            });
        }
        let target = self.locate(area, new_path, new_name);
        if target.exists() {
            return Err(StoreError::AlreadyExists {
                area: area.clone(),
                path: display_path(new_path, new_name),
            });
        }

        Self::create_parent(&target)?;
        fs::rename(&source, &target).map_err(|e| StoreError::io(&target, e))?;

        Ok(Self::record(new_path.to_vec(), new_name.to_string(), false, &target))
    }

    fn extract_archive_into(
        &mut self,
        area: &Area,
        dest: &[String],
        archive_item: &StagedItem,
    ) -> Result<ExtractReport, StoreError> {
        area.ensure_writable()?;
        let source = self.locate(area, &archive_item.path, &archive_item.name);
        let file = File::open(&source).map_err(|e| StoreError::io(&source, e))?;
        let entries = archive::read_entries(file)?;

        // Expanding onto the archive's own name replaces the archive
        if dest == archive_item.full_path().as_slice() {
            fs::remove_file(&source).map_err(|e| StoreError::io(&source, e))?;
        }

        let base = self.locate_dir(area, dest);
        fs::create_dir_all(&base).map_err(|e| StoreError::io(&base, e))?;

        let mut report = ExtractReport::new();
        for entry in entries {
            let Some(segments) = entry.segments else {
                report.insert(entry.raw_name, ExtractStatus::Unsafe);
                continue;
            };

            let target = segments.iter().fold(base.clone(), |acc, s| acc.join(s));

            if entry.is_directory {
                let status = if Self::blocked_by_file(&base, &target) {
                    ExtractStatus::WouldOverwrite
                } else {
                    fs::create_dir_all(&target).map_err(|e| StoreError::io(&target, e))?;
                    ExtractStatus::Extracted
                };
                report.insert(entry.raw_name, status);
                continue;
            }

            if fs::symlink_metadata(&target).is_ok() || Self::blocked_by_file(&base, &target) {
                report.insert(entry.raw_name, ExtractStatus::WouldOverwrite);
                continue;
            }

            Self::create_parent(&target)?;
            fs::write(&target, &entry.data).map_err(|e| StoreError::io(&target, e))?;
            report.insert(entry.raw_name, ExtractStatus::Extracted);
        }

        Ok(report)
    }

    fn create_directory(&mut self, area: &Area, path: &[String]) -> Result<(), StoreError> {
        area.ensure_writable()?;
        let location = self.locate_dir(area, path);
        fs::create_dir_all(&location).map_err(|e| StoreError::io(&location, e))
    }

    fn read(&self, area: &Area, item: &StagedItem) -> Result<Vec<u8>, StoreError> {
        let location = self.locate(area, &item.path, &item.name);
        fs::read(&location).map_err(|e| StoreError::io(&location, e))
    }

    fn clear_area(&mut self, area: &Area) -> Result<(), StoreError> {
        area.ensure_writable()?;
        let location = self.area_dir(area);
        if location.exists() {
            fs::remove_dir_all(&location).map_err(|e| StoreError::io(&location, e))?;
        }
        Ok(())
    }
}
