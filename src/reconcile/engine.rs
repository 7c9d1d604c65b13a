//! Reconciliation state machine
//!
//! One run moves strictly forward through
//! `Staged → Expanded → Walked → PerBucketSimplified → Reported →
//! (Committed | Previewed) → Cleaned`. Each transition is logged and, when a
//! journal is attached, persisted, so a failed run can be located by the
//! last state it reached.

use std::collections::BTreeMap;

use super::report::{RecipientReport, RunReport};
use super::{expand, prune, simplify, walker, RunState};
use crate::error::ReconcileError;
use crate::identity::{IdentifierField, IdentifierResolver, RecipientId, RosterSource};
use crate::journal::{RunJournal, RunRecord};
use crate::sink::{AuxiliaryHook, SubmissionFile, SubmissionSink};
use crate::store::{Area, BlobStore, StagedItem};

/// What the uploader asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub identifier_field: IdentifierField,
    /// Hand results to the sink; otherwise only report them
    pub commit: bool,
}

impl RunRequest {
    pub fn preview(identifier_field: IdentifierField) -> Self {
        Self {
            identifier_field,
            commit: false,
        }
    }

    pub fn commit(identifier_field: IdentifierField) -> Self {
        Self {
            identifier_field,
            commit: true,
        }
    }
}

struct JournalTarget<'a> {
    journal: &'a RunJournal,
    scope: String,
}

/// Drives one scope through a reconciliation run
pub struct Reconciler<'a> {
    store: &'a mut dyn BlobStore,
    sink: &'a mut dyn SubmissionSink,
    hooks: Vec<Box<dyn AuxiliaryHook + 'a>>,
    journal: Option<JournalTarget<'a>>,
    state: RunState,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a mut dyn BlobStore, sink: &'a mut dyn SubmissionSink) -> Self {
        Self {
            store,
            sink,
            hooks: Vec::new(),
            journal: None,
            state: RunState::Started,
        }
    }

    /// Register a hook called after every successful replacement
    pub fn with_hook(mut self, hook: Box<dyn AuxiliaryHook + 'a>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Persist state transitions for `scope`
    pub fn with_journal(mut self, journal: &'a RunJournal, scope: impl Into<String>) -> Self {
        self.journal = Some(JournalTarget {
            journal,
            scope: scope.into(),
        });
        self
    }

    /// Last state reached
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Reconcile the store's draft area against `roster`.
    ///
    /// On a fatal error the scope is left as it was when the error hit.
    pub fn run(
        &mut self,
        roster: &dyn RosterSource,
        request: &RunRequest,
    ) -> Result<RunReport, ReconcileError> {
        self.state = RunState::Started;
        let mut record = match &self.journal {
            Some(target) => Some(target.journal.start(&target.scope)?),
            None => None,
        };

        let result = self.execute(roster, request, &mut record);

        if let Err(e) = &result {
            tracing::error!("Run failed after reaching {}: {}", self.state, e);
            if let (Some(target), Some(record)) = (&self.journal, record.as_mut()) {
                record.fail(e.to_string());
                if let Err(je) = target.journal.save(record) {
                    tracing::warn!("Failed to journal run failure: {}", je);
                }
            }
        }
        result
    }

    fn advance(&mut self, state: RunState, record: &mut Option<RunRecord>) -> Result<(), ReconcileError> {
        self.state = state;
        tracing::info!("Run state: {}", state);
        if let (Some(target), Some(record)) = (&self.journal, record.as_mut()) {
            record.advance(state);
            target.journal.save(record)?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        roster: &dyn RosterSource,
        request: &RunRequest,
        record: &mut Option<RunRecord>,
    ) -> Result<RunReport, ReconcileError> {
        let resolver = IdentifierResolver::build(
            roster.list_eligible_recipients()?,
            request.identifier_field,
        )?;

        self.stage()?;
        self.advance(RunState::Staged, record)?;

        expand::expand_top_level(&mut *self.store, &resolver)?;
        self.advance(RunState::Expanded, record)?;

        let buckets = walker::walk(&mut *self.store, &resolver)?;
        self.advance(RunState::Walked, record)?;

        let mut finals: BTreeMap<RecipientId, Vec<StagedItem>> = BTreeMap::new();
        for (id, bucket) in &buckets {
            let area = bucket.area();
            let files = simplify::apply(
                &mut *self.store,
                &area,
                &bucket.files,
                resolver.token_for(*id),
            )?;
            prune::prune_empty_directories(&mut *self.store, &area, &files)?;
            finals.insert(*id, files);
        }
        self.advance(RunState::PerBucketSimplified, record)?;

        let mut report = self.build_report(&resolver, &finals, request.commit)?;
        self.advance(RunState::Reported, record)?;

        if request.commit {
            self.commit(&resolver, &finals, &mut report)?;
            self.advance(RunState::Committed, record)?;
        } else {
            self.advance(RunState::Previewed, record)?;
        }

        if report.has_unmatched() {
            tracing::warn!(
                "{} unmatched file(s); keeping staging for inspection",
                report.unmatched_paths.len()
            );
            report.staging_preserved = true;
        } else {
            self.clean()?;
            self.advance(RunState::Cleaned, record)?;
        }

        tracing::info!(
            "Run finished: {} recipient(s), {} unmatched",
            report.recipients.len(),
            report.unmatched_paths.len()
        );
        Ok(report)
    }

    /// Clear stale scope data, then copy the upload into staging
    fn stage(&mut self) -> Result<(), ReconcileError> {
        self.store.clear_area(&Area::Staging)?;
        for id in self.store.bucket_areas()? {
            self.store.clear_area(&Area::Bucket(id))?;
        }

        let upload = self.store.list_area(&Area::Draft)?;
        for item in &upload {
            self.store.copy_into(&Area::Draft, item, &Area::Staging)?;
        }
        tracing::info!("Staged {} upload item(s)", upload.len());
        Ok(())
    }

    fn build_report(
        &self,
        resolver: &IdentifierResolver,
        finals: &BTreeMap<RecipientId, Vec<StagedItem>>,
        commit: bool,
    ) -> Result<RunReport, ReconcileError> {
        let mut recipients = Vec::with_capacity(finals.len());
        for (id, files) in finals {
            let recipient = resolver.recipient(*id).ok_or_else(|| {
                ReconcileError::InternalInvariant(format!("bucket for unknown recipient {}", id))
            })?;
            recipients.push(RecipientReport {
                recipient_id: *id,
                full_name: recipient.full_name.clone(),
                matched_file_paths: files.iter().map(StagedItem::display_path).collect(),
                committed: false,
                notices: Vec::new(),
            });
        }

        let unmatched_paths = self
            .store
            .list_files_under(&Area::Staging, &[])?
            .iter()
            .map(StagedItem::display_path)
            .collect();

        Ok(RunReport {
            preview: !commit,
            recipients,
            unmatched_paths,
            staging_preserved: false,
        })
    }

    fn commit(
        &mut self,
        resolver: &IdentifierResolver,
        finals: &BTreeMap<RecipientId, Vec<StagedItem>>,
        report: &mut RunReport,
    ) -> Result<(), ReconcileError> {
        for entry in report.recipients.iter_mut() {
            let id = entry.recipient_id;
            let (Some(recipient), Some(files)) = (resolver.recipient(id), finals.get(&id)) else {
                return Err(ReconcileError::InternalInvariant(format!(
                    "report entry without bucket for recipient {}",
                    id
                )));
            };

            let area = Area::Bucket(id);
            let mut submission = Vec::with_capacity(files.len());
            for file in files {
                submission.push(SubmissionFile {
                    path: file.path.clone(),
                    name: file.name.clone(),
                    content: self.store.read(&area, file)?,
                });
            }

            match self.sink.replace_submission(recipient, &submission) {
                Ok(()) => {
                    entry.committed = true;
                    for hook in &self.hooks {
                        if let Err(e) = hook.submission_replaced(recipient, &submission) {
                            tracing::warn!("Hook failed for recipient {}: {}", id, e);
                        }
                    }
                }
                Err(notices) => {
                    tracing::warn!("Sink rejected submission for recipient {}", id);
                    entry.notices = notices.into_inner();
                }
            }
        }
        Ok(())
    }

    fn clean(&mut self) -> Result<(), ReconcileError> {
        self.store.clear_area(&Area::Staging)?;
        for id in self.store.bucket_areas()? {
            self.store.clear_area(&Area::Bucket(id))?;
        }
        Ok(())
    }
}
