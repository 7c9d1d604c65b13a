//! Per-bucket path simplification
//!
//! Files arrive in a bucket at their full staging path. Two passes shorten
//! those paths without ever merging two files:
//!
//! - Pass A strips the longest leading run of segments shared by all files.
//! - Pass B applies when every file is named after the recipient and sits at
//!   the same depth (`/submission/user01.txt`, `/biblio/user01.txt`). The
//!   rightmost segment that differs for every file becomes the new file name
//!   (`/submission.txt`, `/biblio.txt`), provided nothing after it varies.
//!
//! `plan` is pure; `apply` performs the renames against a store.

use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

use crate::error::ReconcileError;
use crate::identity::resolver::effective_token;
use crate::store::{display_path, Area, BlobStore, StagedItem};

/// Final location of one file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Placement {
    pub path: Vec<String>,
    pub name: String,
}

impl Placement {
    pub fn display_path(&self) -> String {
        display_path(&self.path, &self.name)
    }
}

/// Compute the simplified location of every file, in input order
pub fn plan(files: &[StagedItem], token: &str) -> Result<Vec<Placement>, ReconcileError> {
    let Some(first) = files.first() else {
        return Ok(Vec::new());
    };

    let mut prefix: &[String] = &first.path;
    for file in &files[1..] {
        let shared = prefix
            .iter()
            .zip(&file.path)
            .take_while(|(a, b)| a == b)
            .count();
        prefix = &prefix[..shared];
    }

    let depth = first.path.len();
    let uniform = !token.is_empty()
        && files
            .iter()
            .all(|f| effective_token(f) == token && f.path.len() == depth);

    // Pass A
    let mut paths: Vec<Vec<String>> = Vec::with_capacity(files.len());
    for file in files {
        if !file.path.starts_with(prefix) {
            return Err(ReconcileError::InternalInvariant(format!(
                "{} does not start with the common prefix {}",
                file.display_path(),
                prefix.join("/")
            )));
        }
        paths.push(file.path[prefix.len()..].to_vec());
    }
    let depth = depth - prefix.len();

    let mut placements: Vec<Placement> = paths
        .into_iter()
        .zip(files)
        .map(|(path, file)| Placement {
            path,
            name: file.name.clone(),
        })
        .collect();

    // Pass B
    if files.len() > 1 && uniform {
        if placements.iter().any(|p| p.path.len() != depth) {
            return Err(ReconcileError::InternalInvariant(
                "path lengths disagree after prefix elision".to_string(),
            ));
        }
        if let Some(collapsed) = collapse(&placements, files, depth) {
            placements = collapsed;
        }
    }

    let mut seen = HashSet::new();
    for placement in &placements {
        if !seen.insert((&placement.path, &placement.name)) {
            return Err(ReconcileError::InternalInvariant(format!(
                "two files planned for {}",
                placement.display_path()
            )));
        }
    }

    Ok(placements)
}

/// Pass B. `None` means the pass does not apply and nothing is renamed.
fn collapse(placements: &[Placement], files: &[StagedItem], depth: usize) -> Option<Vec<Placement>> {
    let distinct = |index: usize| -> usize {
        placements
            .iter()
            .map(|p| p.path[index].as_str())
            .collect::<BTreeSet<_>>()
            .len()
    };

    let variable = (0..depth).rev().find(|&i| distinct(i) == files.len())?;
    if ((variable + 1)..depth).any(|i| distinct(i) != 1) {
        tracing::debug!("Same-name collapse skipped: segments after index {} vary", variable);
        return None;
    }

    let collapsed: Vec<Placement> = placements
        .iter()
        .zip(files)
        .map(|(p, file)| {
            let ext = file.extension();
            let name = if ext.is_empty() {
                p.path[variable].clone()
            } else {
                format!("{}.{}", p.path[variable], ext)
            };
            Placement {
                path: p.path[..variable].to_vec(),
                name,
            }
        })
        .collect();

    // A segment plus extension can spell another segment ("a.txt" vs "a" + "txt")
    let unique: HashSet<_> = collapsed.iter().map(|p| (&p.path, &p.name)).collect();
    if unique.len() != collapsed.len() {
        tracing::debug!("Same-name collapse skipped: renamed files would collide");
        return None;
    }
    Some(collapsed)
}

/// Simplify one bucket in place and return its final files, ordered by
/// (path, name).
///
/// Files that move are first parked under unique names at the bucket root,
/// then directories standing where a file must land are removed, then the
/// parked files are renamed into place.
pub fn apply<S: BlobStore + ?Sized>(
    store: &mut S,
    area: &Area,
    files: &[StagedItem],
    token: &str,
) -> Result<Vec<StagedItem>, ReconcileError> {
    let placements = plan(files, token)?;

    let mut settled = Vec::with_capacity(files.len());
    let mut parked = Vec::new();
    for (file, target) in files.iter().zip(placements) {
        if file.path == target.path && file.name == target.name {
            settled.push(file.clone());
            continue;
        }
        let temp_name = format!(".assign-bulk-{}", Uuid::new_v4().simple());
        let temp = store.rename(area, file, &[], &temp_name)?;
        parked.push((temp, target));
    }

    for (_, target) in &parked {
        clear_directory_at(store, area, target)?;
    }

    for (temp, target) in parked {
        tracing::debug!("{}: {} -> {}", area, temp.name, target.display_path());
        settled.push(store.rename(area, &temp, &target.path, &target.name)?);
    }

    settled.sort_by(|a, b| (&a.path, &a.name).cmp(&(&b.path, &b.name)));
    Ok(settled)
}

/// Remove a file-free directory tree occupying a target location
fn clear_directory_at<S: BlobStore + ?Sized>(
    store: &mut S,
    area: &Area,
    target: &Placement,
) -> Result<(), ReconcileError> {
    let Some(existing) = store.find(area, &target.path, &target.name)? else {
        return Ok(());
    };
    if !existing.is_directory {
        return Err(ReconcileError::InternalInvariant(format!(
            "rename target {} is still occupied",
            target.display_path()
        )));
    }

    let full = existing.full_path();
    if !store.list_files_under(area, &full)?.is_empty() {
        return Err(ReconcileError::InternalInvariant(format!(
            "rename target {} holds files",
            target.display_path()
        )));
    }

    let mut dirs: Vec<StagedItem> = store
        .list_area(area)?
        .into_iter()
        .filter(|d| d.is_directory && d.path.starts_with(&full))
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.depth()));
    for dir in dirs {
        store.delete(area, &dir)?;
    }
    store.delete(area, &existing)?;
    Ok(())
}
