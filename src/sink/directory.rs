//! Directory-backed submission sink
//!
//! Each recipient's submission lives in `<root>/<recipient id>/`. A new
//! submission is written to a hidden sibling first and swapped in, so a
//! failed write leaves the previous submission intact.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{SinkNotices, SubmissionFile, SubmissionSink};
use crate::identity::Recipient;

/// Limits a submission must respect. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionPolicy {
    pub max_files: Option<usize>,
    pub max_file_bytes: Option<u64>,
}

impl SubmissionPolicy {
    /// Every way `files` breaks the policy
    pub fn check(&self, files: &[SubmissionFile]) -> SinkNotices {
        let mut notices = SinkNotices::default();

        if let Some(max) = self.max_files {
            if files.len() > max {
                notices.push(format!(
                    "submission has {} files, at most {} allowed",
                    files.len(),
                    max
                ));
            }
        }
        if let Some(max) = self.max_file_bytes {
            for file in files {
                let size = file.content.len() as u64;
                if size > max {
                    notices.push(format!(
                        "{} is {} bytes, at most {} allowed",
                        file.display_path(),
                        size,
                        max
                    ));
                }
            }
        }

        notices
    }
}

#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    policy: SubmissionPolicy,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>, policy: SubmissionPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Where a recipient's submission lives
    pub fn submission_dir(&self, recipient: &Recipient) -> PathBuf {
        self.root.join(recipient.id.to_string())
    }

    fn write_all(dir: &Path, files: &[SubmissionFile]) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        for file in files {
            let mut target = dir.to_path_buf();
            for segment in &file.path {
                target.push(segment);
            }
            fs::create_dir_all(&target)?;
            fs::write(target.join(&file.name), &file.content)?;
        }
        Ok(())
    }

    fn swap_in(&self, staged: &Path, live: &Path, recipient: &Recipient) -> std::io::Result<()> {
        if !live.exists() {
            return fs::rename(staged, live);
        }

        let retired = self
            .root
            .join(format!(".{}.old-{}", recipient.id, Uuid::new_v4().simple()));
        fs::rename(live, &retired)?;
        if let Err(e) = fs::rename(staged, live) {
            return Err(Self::restore(&retired, live, e));
        }
        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!("Failed to remove {}: {}", retired.display(), e);
        }
        Ok(())
    }

    /// Put a retired submission back after a failed swap
    fn restore(retired: &Path, live: &Path, cause: std::io::Error) -> std::io::Error {
        match fs::rename(retired, live) {
            Ok(()) => cause,
            Err(e) => {
                tracing::error!(
                    "Failed to restore {} from {}: {}",
                    live.display(),
                    retired.display(),
                    e
                );
                std::io::Error::new(
                    cause.kind(),
                    format!(
                        "{}; previous submission left at {}",
                        cause,
                        retired.display()
                    ),
                )
            }
        }
    }
}

impl SubmissionSink for DirectorySink {
    fn replace_submission(
        &mut self,
        recipient: &Recipient,
        files: &[SubmissionFile],
    ) -> Result<(), SinkNotices> {
        let notices = self.policy.check(files);
        if !notices.is_empty() {
            return Err(notices);
        }

        let live = self.submission_dir(recipient);
        let staged = self
            .root
            .join(format!(".{}.new-{}", recipient.id, Uuid::new_v4().simple()));

        let result = Self::write_all(&staged, files)
            .and_then(|_| self.swap_in(&staged, &live, recipient));
        if let Err(e) = result {
            if staged.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staged) {
                    tracing::error!("Failed to remove {}: {}", staged.display(), cleanup);
                }
            }
            return Err(SinkNotices::single(format!(
                "could not store submission: {}",
                e
            )));
        }

        tracing::debug!("Stored {} file(s) in {}", files.len(), live.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;
    use tempfile::tempdir;

    fn file(path: &[&str], name: &str, content: &[u8]) -> SubmissionFile {
        SubmissionFile {
            path: path.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
            content: content.to_vec(),
        }
    }

    #[test]
    fn test_replaces_previous_submission() {
        let dir = tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path(), SubmissionPolicy::default());
        let ada = Recipient::new(1, "Ada");

        sink.replace_submission(&ada, &[file(&[], "old.txt", b"old")])
            .unwrap();
        sink.replace_submission(&ada, &[file(&["parts"], "new.txt", b"new")])
            .unwrap();

        let live = dir.path().join("1");
        assert!(!live.join("old.txt").exists());
        assert_eq!(fs::read(live.join("parts/new.txt")).unwrap(), b"new");
        // No temporary siblings left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_policy_violations_leave_submission_untouched() {
        let dir = tempdir().unwrap();
        let policy = SubmissionPolicy {
            max_files: Some(1),
            max_file_bytes: Some(3),
        };
        let mut sink = DirectorySink::new(dir.path(), policy);
        let ada = Recipient::new(1, "Ada");
        sink.replace_submission(&ada, &[file(&[], "a.txt", b"ok")])
            .unwrap();

        let notices = sink
            .replace_submission(
                &ada,
                &[file(&[], "a.txt", b"toolong"), file(&[], "b.txt", b"b")],
            )
            .unwrap_err();

        assert_eq!(notices.0.len(), 2);
        assert!(notices.0[0].contains("2 files"));
        assert!(notices.0[1].contains("/a.txt is 7 bytes"));
        assert_eq!(fs::read(dir.path().join("1/a.txt")).unwrap(), b"ok");
    }

    #[test]
    fn test_scopes_keep_separate_submissions() {
        let dir = tempdir().unwrap();
        let config = ReconcileConfig {
            submissions_root: dir.path().to_path_buf(),
            ..ReconcileConfig::default()
        };
        let ada = Recipient::new(1, "Ada");

        let mut third = DirectorySink::new(config.submission_root("assign-3"), config.policy);
        third
            .replace_submission(&ada, &[file(&[], "essay.txt", b"three")])
            .unwrap();
        let mut fourth = DirectorySink::new(config.submission_root("assign-4"), config.policy);
        fourth
            .replace_submission(&ada, &[file(&[], "essay.txt", b"four")])
            .unwrap();

        assert_eq!(
            fs::read(third.submission_dir(&ada).join("essay.txt")).unwrap(),
            b"three"
        );
        assert_eq!(
            fs::read(fourth.submission_dir(&ada).join("essay.txt")).unwrap(),
            b"four"
        );
    }

    #[test]
    fn test_failed_restore_names_retired_location() {
        let dir = tempdir().unwrap();
        let retired = dir.path().join(".1.old-gone");
        let live = dir.path().join("1");

        let cause = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "swap failed");
        let err = DirectorySink::restore(&retired, &live, cause);

        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("swap failed"));
        assert!(err.to_string().contains(".1.old-gone"));
    }

    #[test]
    fn test_successful_restore_returns_cause() {
        let dir = tempdir().unwrap();
        let retired = dir.path().join(".1.old-x");
        fs::create_dir_all(&retired).unwrap();
        fs::write(retired.join("a.txt"), b"kept").unwrap();
        let live = dir.path().join("1");

        let cause = std::io::Error::other("swap failed");
        let err = DirectorySink::restore(&retired, &live, cause);

        assert_eq!(err.to_string(), "swap failed");
        assert_eq!(fs::read(live.join("a.txt")).unwrap(), b"kept");
    }
}
