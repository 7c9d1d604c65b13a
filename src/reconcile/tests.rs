//! End-to-end runs over the in-memory and on-disk stores

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tempfile::tempdir;

use super::{Reconciler, RunReport, RunRequest, RunState};
use crate::error::ReconcileError;
use crate::identity::{IdentifierField, Recipient, RecipientId, StaticRoster};
use crate::journal::RunJournal;
use crate::sink::{AuxiliaryHook, SinkNotices, SubmissionFile, SubmissionSink};
use crate::store::archive::fixtures::zip_bytes;
use crate::sink::{DirectorySink, SubmissionPolicy};
use crate::store::{Area, BlobStore, DiskStore, MemoryStore};

#[derive(Default)]
struct RecordingSink {
    stored: BTreeMap<RecipientId, Vec<String>>,
    reject: Vec<RecipientId>,
}

impl SubmissionSink for RecordingSink {
    fn replace_submission(
        &mut self,
        recipient: &Recipient,
        files: &[SubmissionFile],
    ) -> Result<(), SinkNotices> {
        if self.reject.contains(&recipient.id) {
            return Err(SinkNotices::single("quota exceeded"));
        }
        self.stored.insert(
            recipient.id,
            files.iter().map(SubmissionFile::display_path).collect(),
        );
        Ok(())
    }
}

struct RecordingHook(Rc<RefCell<Vec<RecipientId>>>);

impl AuxiliaryHook for RecordingHook {
    fn submission_replaced(&self, recipient: &Recipient, _files: &[SubmissionFile]) -> Result<(), String> {
        self.0.borrow_mut().push(recipient.id);
        Err("renderer offline".to_string())
    }
}

fn roster() -> StaticRoster {
    let people = [(1, "user01"), (2, "user02"), (5, "user05")];
    StaticRoster::new(
        people
            .iter()
            .map(|(id, name)| {
                Recipient::new(*id, format!("Person {}", id))
                    .with_field(IdentifierField::Username, *name)
                    .with_field(IdentifierField::IdNumber, "7")
            })
            .collect(),
    )
}

fn upload(files: &[(&str, Vec<u8>)]) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (path, data) in files {
        store.add_file(&Area::Draft, path, data.clone()).unwrap();
    }
    store
}

fn preview(store: &mut MemoryStore) -> Result<RunReport, ReconcileError> {
    let mut sink = RecordingSink::default();
    let mut reconciler = Reconciler::new(store, &mut sink);
    reconciler.run(&roster(), &RunRequest::preview(IdentifierField::Username))
}

fn matched(report: &RunReport, id: u64) -> Vec<String> {
    report
        .recipient(RecipientId::from(id))
        .map(|r| r.matched_file_paths.clone())
        .unwrap_or_default()
}

#[test]
fn test_shared_prefix_is_removed() {
    let mut store = upload(&[
        ("/q/user01/submission.txt", b"s".to_vec()),
        ("/q/user01/biblio.txt", b"b".to_vec()),
    ]);

    let report = preview(&mut store).unwrap();

    assert!(report.preview);
    assert_eq!(matched(&report, 1), vec!["/biblio.txt", "/submission.txt"]);
    assert!(report.unmatched_paths.is_empty());
    assert!(!report.staging_preserved);
    // Cleaned: only the upload is left
    assert!(store.list_area(&Area::Staging).unwrap().is_empty());
    assert!(store.bucket_areas().unwrap().is_empty());
    assert_eq!(store.list_files_under(&Area::Draft, &[]).unwrap().len(), 2);
}

#[test]
fn test_same_named_files_collapse() {
    let mut store = upload(&[
        ("/submission/user01.txt", b"s".to_vec()),
        ("/biblio/user01.txt", b"b".to_vec()),
    ]);

    let report = preview(&mut store).unwrap();
    assert_eq!(matched(&report, 1), vec!["/biblio.txt", "/submission.txt"]);
}

#[test]
fn test_differently_named_files_keep_names() {
    let mut store = upload(&[
        ("/question3/user01/submission.txt", b"s".to_vec()),
        ("/question3/user01/sbmn.txt", b"b".to_vec()),
    ]);

    let report = preview(&mut store).unwrap();
    assert_eq!(matched(&report, 1), vec!["/sbmn.txt", "/submission.txt"]);
}

#[test]
fn test_archive_named_after_recipient_is_kept_whole() {
    let mut store = upload(&[("/user01.zip", zip_bytes(&[("user02.txt", b"2")]))]);

    let report = preview(&mut store).unwrap();

    assert_eq!(matched(&report, 1), vec!["/user01.zip"]);
    assert!(report.recipient(RecipientId::from(2)).is_none());
}

#[test]
fn test_top_level_archives_expand_side_by_side() {
    let mut store = upload(&[
        ("/batch1.zip", zip_bytes(&[("user05.txt", b"5")])),
        ("/batch2.zip", zip_bytes(&[("q/user02/a.txt", b"a")])),
    ]);

    let report = preview(&mut store).unwrap();

    assert_eq!(matched(&report, 5), vec!["/user05.txt"]);
    assert_eq!(matched(&report, 2), vec!["/a.txt"]);
    assert!(report.unmatched_paths.is_empty());
}

#[test]
fn test_leftovers_preserve_staging() {
    let mut store = upload(&[
        ("/user01.txt", b"1".to_vec()),
        ("/userz1.txt", b"z".to_vec()),
    ]);

    let report = preview(&mut store).unwrap();

    assert_eq!(report.unmatched_paths, vec!["/userz1.txt"]);
    assert!(report.staging_preserved);
    assert!(store.find(&Area::Staging, &[], "userz1.txt").unwrap().is_some());
    assert_eq!(store.bucket_areas().unwrap(), vec![RecipientId::from(1)]);
}

#[test]
fn test_ambiguous_identifier_fails_before_staging() {
    let mut store = upload(&[("/7.txt", b"x".to_vec())]);
    let mut sink = RecordingSink::default();
    let mut reconciler = Reconciler::new(&mut store, &mut sink);

    let err = reconciler
        .run(&roster(), &RunRequest::preview(IdentifierField::IdNumber))
        .unwrap_err();

    assert!(matches!(err, ReconcileError::AmbiguousIdentifier { .. }));
    assert_eq!(reconciler.state(), RunState::Started);
    drop(reconciler);
    assert!(store.list_area(&Area::Staging).unwrap().is_empty());
}

#[test]
fn test_rerun_is_idempotent() {
    let mut store = upload(&[
        ("/batch.zip", zip_bytes(&[("user05/report.pdf", b"r")])),
        ("/hw/user01.txt", b"1".to_vec()),
        ("/stray.txt", b"?".to_vec()),
    ]);

    let first = preview(&mut store).unwrap();
    let second = preview(&mut store).unwrap();

    assert_eq!(first, second);
    assert_eq!(matched(&second, 5), vec!["/report.pdf"]);
    assert_eq!(second.unmatched_paths, vec!["/stray.txt"]);
}

#[test]
fn test_commit_reports_sink_notices_per_recipient() {
    let mut store = upload(&[
        ("/user01.txt", b"1".to_vec()),
        ("/user02/a.txt", b"a".to_vec()),
    ]);
    let mut sink = RecordingSink {
        reject: vec![RecipientId::from(2)],
        ..Default::default()
    };
    let seen = Rc::new(RefCell::new(Vec::new()));

    let report = {
        let mut reconciler = Reconciler::new(&mut store, &mut sink)
            .with_hook(Box::new(RecordingHook(seen.clone())));
        reconciler
            .run(&roster(), &RunRequest::commit(IdentifierField::Username))
            .unwrap()
    };

    assert!(!report.preview);
    assert!(report.recipient(RecipientId::from(1)).unwrap().notices.is_empty());
    assert_eq!(
        report.recipient(RecipientId::from(2)).unwrap().notices,
        vec!["quota exceeded"]
    );
    assert_eq!(report.with_notices().count(), 1);
    assert!(report.recipient(RecipientId::from(1)).unwrap().committed);
    assert!(!report.recipient(RecipientId::from(2)).unwrap().committed);
    assert_eq!(sink.stored[&RecipientId::from(1)], vec!["/user01.txt"]);
    assert!(!sink.stored.contains_key(&RecipientId::from(2)));
    // Hook failures are swallowed, and only successful replacements are seen
    assert_eq!(*seen.borrow(), vec![RecipientId::from(1)]);
}

#[test]
fn test_preview_never_touches_sink() {
    let mut store = upload(&[("/user01.txt", b"1".to_vec())]);
    let mut sink = RecordingSink::default();
    {
        let mut reconciler = Reconciler::new(&mut store, &mut sink);
        reconciler
            .run(&roster(), &RunRequest::preview(IdentifierField::Username))
            .unwrap();
    }
    assert!(sink.stored.is_empty());
}

#[test]
fn test_conflict_leaves_staging_for_inspection() {
    let mut store = upload(&[(
        "/batch.zip",
        zip_bytes(&[("d/user01.txt", b"1"), ("d/user01.txt/", b"")]),
    )]);

    let err = preview(&mut store).unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict { .. }));
    let staged: Vec<String> = store
        .list_files_under(&Area::Staging, &[])
        .unwrap()
        .iter()
        .map(|f| f.display_path())
        .collect();
    assert_eq!(staged, vec!["/batch.zip/d/user01.txt"]);
}

#[test]
fn test_journal_tracks_states() {
    let dir = tempdir().unwrap();
    let journal = RunJournal::new(dir.path());

    let mut store = upload(&[("/user01.txt", b"1".to_vec())]);
    let mut sink = RecordingSink::default();
    {
        let mut reconciler =
            Reconciler::new(&mut store, &mut sink).with_journal(&journal, "assign-3");
        reconciler
            .run(&roster(), &RunRequest::preview(IdentifierField::Username))
            .unwrap();
        assert_eq!(reconciler.state(), RunState::Cleaned);
    }
    let record = journal.load("assign-3").unwrap().unwrap();
    assert!(record.is_complete());
    let states: Vec<RunState> = record.transitions.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![
            RunState::Started,
            RunState::Staged,
            RunState::Expanded,
            RunState::Walked,
            RunState::PerBucketSimplified,
            RunState::Reported,
            RunState::Previewed,
            RunState::Cleaned,
        ]
    );
}

#[test]
fn test_journal_records_failure_state() {
    let dir = tempdir().unwrap();
    let journal = RunJournal::new(dir.path());

    let mut store = upload(&[("/batch.zip", zip_bytes(&[("../evil.txt", b"x")]))]);
    let mut sink = RecordingSink::default();
    {
        let mut reconciler =
            Reconciler::new(&mut store, &mut sink).with_journal(&journal, "assign-3");
        assert!(reconciler
            .run(&roster(), &RunRequest::preview(IdentifierField::Username))
            .is_err());
    }

    let record = journal.load("assign-3").unwrap().unwrap();
    assert_eq!(record.state, RunState::Staged);
    assert!(record.failure.unwrap().contains("batch.zip"));
}

fn write_upload(root: &std::path::Path, path: &str, data: &[u8]) {
    let target = root.join(path);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(target, data).unwrap();
}

#[test]
fn test_disk_store_commit_into_directory_sink() {
    let dir = tempdir().unwrap();
    let upload_dir = dir.path().join("upload");
    write_upload(&upload_dir, "q/user01/submission.txt", b"one");
    write_upload(&upload_dir, "user02.txt", b"two");

    let mut store = DiskStore::new(&upload_dir, dir.path().join("scope"));
    let mut sink = DirectorySink::new(dir.path().join("submissions"), SubmissionPolicy::default());
    let report = {
        let mut reconciler = Reconciler::new(&mut store, &mut sink);
        reconciler
            .run(&roster(), &RunRequest::commit(IdentifierField::Username))
            .unwrap()
    };

    assert!(!report.has_unmatched());
    assert!(report.recipients.iter().all(|r| r.committed));
    assert_eq!(matched(&report, 1), vec!["/submission.txt"]);
    assert_eq!(
        std::fs::read(dir.path().join("submissions/1/submission.txt")).unwrap(),
        b"one"
    );
    assert_eq!(
        std::fs::read(dir.path().join("submissions/2/user02.txt")).unwrap(),
        b"two"
    );
    // The upload is left alone and the scope is cleaned
    assert!(upload_dir.join("q/user01/submission.txt").is_file());
    assert!(store.list_area(&Area::Staging).unwrap().is_empty());
}

#[test]
fn test_disk_store_reports_conflict_for_file_used_as_folder() {
    let dir = tempdir().unwrap();
    let upload_dir = dir.path().join("upload");
    write_upload(
        &upload_dir,
        "batch.zip",
        &zip_bytes(&[("a", b"1"), ("a/b.txt", b"2")]),
    );

    let mut store = DiskStore::new(&upload_dir, dir.path().join("scope"));
    let err = preview_on(&mut store).unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict { .. }), "got {err}");

    let mut memory = upload(&[("/batch.zip", zip_bytes(&[("a", b"1"), ("a/b.txt", b"2")]))]);
    assert!(matches!(
        preview(&mut memory),
        Err(ReconcileError::Conflict { .. })
    ));
}

fn preview_on(store: &mut dyn BlobStore) -> Result<RunReport, ReconcileError> {
    let mut sink = RecordingSink::default();
    let mut reconciler = Reconciler::new(store, &mut sink);
    reconciler.run(&roster(), &RunRequest::preview(IdentifierField::Username))
}
