//! In-memory blob store
//!
//! Records live in an arena; a sorted index maps `(area, path, name)` to
//! arena slots so that listings come back in path order. File content is
//! content-addressed by SHA-256 digest and shared between copies.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::Arc;

use super::archive::{self, ExtractReport, ExtractStatus};
use super::item::{display_path, split_path, ContentRef, StagedItem};
use super::{Area, BlobStore};
use crate::error::StoreError;
use crate::identity::RecipientId;

type Key = (Area, Vec<String>, String);

/// Arena-backed blob store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    slots: Vec<Option<StagedItem>>,
    index: BTreeMap<Key, usize>,
    blobs: HashMap<String, Arc<Vec<u8>>>,
}

fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file at a slash path such as `/q/user01/a.txt`.
    ///
    /// Works on every area including `Draft`, since this is how an upload
    /// gets into the store in the first place.
    pub fn add_file(
        &mut self,
        area: &Area,
        path: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<StagedItem, StoreError> {
        let mut segments = split_path(path);
        let name = segments.pop().unwrap_or_default();
        let content = self.put_blob(data.into());
        let item = StagedItem::file(segments, name, content);
        self.insert(area, item.clone())?;
        Ok(item)
    }

    /// Seed a directory (and its ancestors) at a slash path
    pub fn add_directory(&mut self, area: &Area, path: &str) -> Result<(), StoreError> {
        self.ensure_dirs(area, &split_path(path))
    }

    /// Number of live records across all areas
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn put_blob(&mut self, data: Vec<u8>) -> ContentRef {
        let key = digest(&data);
        self.blobs.entry(key.clone()).or_insert_with(|| Arc::new(data));
        ContentRef::Digest(key)
    }

    fn key(area: &Area, path: &[String], name: &str) -> Key {
        (area.clone(), path.to_vec(), name.to_string())
    }

    fn get(&self, area: &Area, path: &[String], name: &str) -> Option<&StagedItem> {
        self.index
            .get(&Self::key(area, path, name))
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Insert a record, creating directory records for its ancestors
    fn insert(&mut self, area: &Area, item: StagedItem) -> Result<(), StoreError> {
        self.ensure_dirs(area, &item.path)?;
        let key = Self::key(area, &item.path, &item.name);
        match self.index.get(&key) {
            Some(&slot) => self.slots[slot] = Some(item),
            None => {
                self.slots.push(Some(item));
                self.index.insert(key, self.slots.len() - 1);
            }
        }
        Ok(())
    }

    fn remove(&mut self, area: &Area, path: &[String], name: &str) -> Option<StagedItem> {
        let slot = self.index.remove(&Self::key(area, path, name))?;
        self.slots[slot].take()
    }

    fn ensure_dirs(&mut self, area: &Area, path: &[String]) -> Result<(), StoreError> {
        for depth in 0..path.len() {
            let parent = &path[..depth];
            let name = &path[depth];
            match self.get(area, parent, name) {
                Some(existing) if existing.is_directory => {}
                Some(existing) => {
                    return Err(StoreError::AlreadyExists {
                        area: area.clone(),
                        path: existing.display_path(),
                    })
                }
                None => {
                    let dir = StagedItem::directory(parent.to_vec(), name.clone());
                    self.slots.push(Some(dir));
                    self.index
                        .insert(Self::key(area, parent, name), self.slots.len() - 1);
                }
            }
        }
        Ok(())
    }

    /// Records in `area` whose parent path starts with `prefix`
    fn descendants<'a>(
        &'a self,
        area: &'a Area,
        prefix: &'a [String],
    ) -> impl Iterator<Item = &'a StagedItem> + 'a {
        self.index
            .range(Self::key(area, prefix, "")..)
            .take_while(move |((a, path, _), _)| a == area && path.starts_with(prefix))
            .filter_map(move |(_, &slot)| self.slots[slot].as_ref())
    }
}

impl BlobStore for MemoryStore {
    fn list_children(&self, area: &Area, dir: &[String]) -> Result<Vec<StagedItem>, StoreError> {
        Ok(self
            .descendants(area, dir)
            .filter(|item| item.path == dir)
            .cloned()
            .collect())
    }

    fn list_files_under(&self, area: &Area, dir: &[String]) -> Result<Vec<StagedItem>, StoreError> {
        Ok(self
            .descendants(area, dir)
            .filter(|item| !item.is_directory)
            .cloned()
            .collect())
    }

    fn list_area(&self, area: &Area) -> Result<Vec<StagedItem>, StoreError> {
        Ok(self.descendants(area, &[]).cloned().collect())
    }

    fn bucket_areas(&self) -> Result<Vec<RecipientId>, StoreError> {
        let ids: BTreeSet<RecipientId> = self
            .index
            .keys()
            .filter_map(|(area, _, _)| match area {
                Area::Bucket(id) => Some(*id),
                _ => None,
            })
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn find(&self, area: &Area, path: &[String], name: &str) -> Result<Option<StagedItem>, StoreError> {
        Ok(self.get(area, path, name).cloned())
    }

    fn copy_into(&mut self, from: &Area, item: &StagedItem, to: &Area) -> Result<StagedItem, StoreError> {
        to.ensure_writable()?;
        let source = self
            .get(from, &item.path, &item.name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                area: from.clone(),
                path: item.display_path(),
            })?;

        if source.is_directory {
            self.ensure_dirs(to, &source.full_path())?;
            return Ok(source);
        }

        if self.get(to, &source.path, &source.name).is_some() {
            return Err(StoreError::AlreadyExists {
                area: to.clone(),
                path: source.display_path(),
            });
        }

        self.insert(to, source.clone())?;
        Ok(source)
    }

    fn delete(&mut self, area: &Area, item: &StagedItem) -> Result<(), StoreError> {
        area.ensure_writable()?;
        if self.get(area, &item.path, &item.name).is_none() {
            return Err(StoreError::NotFound {
                area: area.clone(),
                path: item.display_path(),
            });
        }

        if item.is_directory {
            let full = item.full_path();
            if self.descendants(area, &full).next().is_some() {
                return Err(StoreError::NotEmpty {
                    area: area.clone(),
                    path: item.display_path(),
                });
            }
        }

        self.remove(area, &item.path, &item.name);
        Ok(())
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
        if self.get(area, new_path, new_name).is_some() {
            return Err(StoreError::AlreadyExists {
                area: area.clone(),
                path: display_path(new_path, new_name),
            });
        }

        let mut record = self
            .remove(area, &item.path, &item.name)
            .ok_or_else(|| StoreError::NotFound {
                area: area.clone(),
                path: item.display_path(),
            })?;
        let original = record.clone();
        record.path = new_path.to_vec();
        record.name = new_name.to_string();
        if let Err(e) = self.insert(area, record.clone()) {
            // Put the record back where it was
            self.insert(area, original)?;
            return Err(e);
        }
        Ok(record)
    }

    fn extract_archive_into(
        &mut self,
        area: &Area,
        dest: &[String],
        archive_item: &StagedItem,
    ) -> Result<ExtractReport, StoreError> {
        area.ensure_writable()?;
        let bytes = self.read(area, archive_item)?;
        let entries = archive::read_entries(Cursor::new(bytes))?;

        // Expanding onto the archive's own name replaces the archive
        if dest == archive_item.full_path().as_slice() {
            self.remove(area, &archive_item.path, &archive_item.name);
        }

        self.ensure_dirs(area, dest)?;
        let mut report = ExtractReport::new();

        for entry in entries {
            let Some(segments) = entry.segments else {
                report.insert(entry.raw_name, ExtractStatus::Unsafe);
                continue;
            };

            let mut target = dest.to_vec();
            target.extend(segments);

            if entry.is_directory {
                let status = match self.ensure_dirs(area, &target) {
                    Ok(()) => ExtractStatus::Extracted,
                    Err(_) => ExtractStatus::WouldOverwrite,
                };
                report.insert(entry.raw_name, status);
                continue;
            }

            let name = target.pop().unwrap_or_default();
            if self.get(area, &target, &name).is_some() {
                report.insert(entry.raw_name, ExtractStatus::WouldOverwrite);
                continue;
            }

            let content = self.put_blob(entry.data);
            let status = match self.insert(area, StagedItem::file(target, name, content)) {
                Ok(()) => ExtractStatus::Extracted,
                Err(_) => ExtractStatus::WouldOverwrite,
            };
            report.insert(entry.raw_name, status);
        }

        Ok(report)
    }

    fn create_directory(&mut self, area: &Area, path: &[String]) -> Result<(), StoreError> {
        area.ensure_writable()?;
        self.ensure_dirs(area, path)
    }

    fn read(&self, area: &Area, item: &StagedItem) -> Result<Vec<u8>, StoreError> {
        let not_found = || StoreError::NotFound {
            area: area.clone(),
            path: item.display_path(),
        };
        let record = self.get(area, &item.path, &item.name).ok_or_else(not_found)?;
        match &record.content {
            Some(ContentRef::Digest(key)) => self
                .blobs
                .get(key)
                .map(|data| data.as_ref().clone())
                .ok_or_else(not_found),
            _ => Err(not_found()),
        }
    }

    fn clear_area(&mut self, area: &Area) -> Result<(), StoreError> {
        area.ensure_writable()?;
        let keys: Vec<Key> = self
            .index
            .keys()
            .filter(|(a, _, _)| a == area)
            .cloned()
            .collect();
        for (a, path, name) in keys {
            self.remove(&a, &path, &name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::archive::fixtures::zip_bytes;

    fn names(items: &[StagedItem]) -> Vec<String> {
        items.iter().map(|i| i.display_path()).collect()
    }

    #[test]
    fn test_add_file_creates_ancestors() {
        let mut store = MemoryStore::new();
        store.add_file(&Area::Staging, "/q/user01/a.txt", "a").unwrap();

        let all = store.list_area(&Area::Staging).unwrap();
        assert_eq!(names(&all), vec!["/q", "/q/user01", "/q/user01/a.txt"]);
        assert!(all[0].is_directory);
        assert!(!all[2].is_directory);
    }

    #[test]
    fn test_list_children_and_files_under() {
        let mut store = MemoryStore::new();
        store.add_file(&Area::Staging, "/a/x.txt", "x").unwrap();
        store.add_file(&Area::Staging, "/a/b/y.txt", "y").unwrap();
        store.add_file(&Area::Staging, "/c.txt", "c").unwrap();

        let root = store.list_children(&Area::Staging, &[]).unwrap();
        assert_eq!(names(&root), vec!["/a", "/c.txt"]);

        let under_a = store
            .list_files_under(&Area::Staging, &split_path("/a"))
            .unwrap();
        assert_eq!(names(&under_a), vec!["/a/x.txt", "/a/b/y.txt"]);
    }

    #[test]
    fn test_draft_is_read_only() {
        let mut store = MemoryStore::new();
        let item = store.add_file(&Area::Draft, "/a.txt", "a").unwrap();

        assert!(matches!(
            store.delete(&Area::Draft, &item),
            Err(StoreError::ReadOnly(Area::Draft))
        ));
        assert!(store.clear_area(&Area::Draft).is_err());

        let copied = store.copy_into(&Area::Draft, &item, &Area::Staging).unwrap();
        assert_eq!(store.read(&Area::Staging, &copied).unwrap(), b"a");
    }

    #[test]
    fn test_rename_refuses_occupied_target() {
        let mut store = MemoryStore::new();
        let a = store.add_file(&Area::Staging, "/d/a.txt", "a").unwrap();
        store.add_file(&Area::Staging, "/b.txt", "b").unwrap();

        let err = store.rename(&Area::Staging, &a, &[], "b.txt").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let renamed = store.rename(&Area::Staging, &a, &[], "c.txt").unwrap();
        assert_eq!(renamed.display_path(), "/c.txt");
        assert_eq!(store.read(&Area::Staging, &renamed).unwrap(), b"a");
        assert!(store
            .find(&Area::Staging, &split_path("/d"), "a.txt")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_non_empty_directory_fails() {
        let mut store = MemoryStore::new();
        store.add_file(&Area::Staging, "/d/a.txt", "a").unwrap();
        let dir = store.find(&Area::Staging, &[], "d").unwrap().unwrap();

        assert!(matches!(
            store.delete(&Area::Staging, &dir),
            Err(StoreError::NotEmpty { .. })
        ));
    }

    #[test]
    fn test_extract_reports_overwrites() {
        let mut store = MemoryStore::new();
        let zip = zip_bytes(&[("x.txt", b"new"), ("y.txt", b"y")]);
        let archive = store.add_file(&Area::Staging, "/batch.zip", zip).unwrap();
        store.add_file(&Area::Staging, "/out/x.txt", "old").unwrap();

        let report = store
            .extract_archive_into(&Area::Staging, &split_path("/out"), &archive)
            .unwrap();

        assert_eq!(report["x.txt"], ExtractStatus::WouldOverwrite);
        assert_eq!(report["y.txt"], ExtractStatus::Extracted);
        let x = store
            .find(&Area::Staging, &split_path("/out"), "x.txt")
            .unwrap()
            .unwrap();
        assert_eq!(store.read(&Area::Staging, &x).unwrap(), b"old");
        // Extracting elsewhere leaves the archive alone
        assert!(store.find(&Area::Staging, &[], "batch.zip").unwrap().is_some());
    }

    #[test]
    fn test_extract_onto_own_name_replaces_archive() {
        let mut store = MemoryStore::new();
        let zip = zip_bytes(&[("inner/user05.txt", b"5")]);
        let archive = store.add_file(&Area::Staging, "/batch.zip", zip).unwrap();

        store
            .extract_archive_into(&Area::Staging, &archive.full_path(), &archive)
            .unwrap();

        let top = store.find(&Area::Staging, &[], "batch.zip").unwrap().unwrap();
        assert!(top.is_directory);
        let files = store.list_files_under(&Area::Staging, &[]).unwrap();
        assert_eq!(names(&files), vec!["/batch.zip/inner/user05.txt"]);
    }

    #[test]
    fn test_bucket_areas_and_clear() {
        let mut store = MemoryStore::new();
        let one = Area::Bucket(RecipientId::from(1));
        let two = Area::Bucket(RecipientId::from(2));
        store.add_file(&one, "/a.txt", "a").unwrap();
        store.add_file(&two, "/b.txt", "b").unwrap();

        assert_eq!(
            store.bucket_areas().unwrap(),
            vec![RecipientId::from(1), RecipientId::from(2)]
        );

        store.clear_area(&one).unwrap();
        assert_eq!(store.bucket_areas().unwrap(), vec![RecipientId::from(2)]);
    }
}
