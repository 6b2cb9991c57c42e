//! Intake orchestrator.
//!
//! Drives one upload through classify → read text → extract → resolve case
//! key → persist → reconcile → stage, and carries review submissions to the
//! ledger. Operations on one case are serialized by a per-case lock;
//! different cases proceed in parallel.
//!
//! The service owns no configuration: every call receives the runtime that
//! was current when the request started, so a reload never changes an
//! operation midway.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IntakeRuntime;
use crate::db::{
    insert_archive_entry, list_archive_entries, DatabaseError, DocumentRepository,
    SqliteDocumentRepository,
};
use crate::drafts::{DraftError, DraftFilter, DraftSessionStore};
use crate::ledger::{
    LedgerError, LedgerRecord, LedgerRecordInput, LedgerStore, LedgerWrite, SqliteLedgerStore,
};
use crate::models::enums::{Confidence, DocumentType};
use crate::models::{
    CaseKey, Draft, DraftArchiveEntry, DraftSummary, FieldResolution, UploadedDocument,
};
use crate::pipeline::case_key::CaseKeySource;
use crate::pipeline::classify::ClassificationRejected;
use crate::pipeline::extraction::{read_pages, PdfExtractor, PdfTextExtractor};
use crate::pipeline::import::{compute_content_hash, MAX_UPLOAD_BYTES};
use crate::pipeline::reconcile::{latest_per_type, ReconcileInput, ReconciliationEngine};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Rejected(#[from] ClassificationRejected),

    #[error("{filename} is {size} bytes; the limit is {max}")]
    TooLarge { filename: String, size: usize, max: usize },

    #[error("Cannot determine the case of {filename}; supply a case key")]
    CaseKeyUnresolved { filename: String },

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Uploader-supplied case key; wins over filename and text.
    pub case_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Accepted {
        document_id: Uuid,
        case_key: CaseKey,
        case_key_source: CaseKeySource,
        document_type: DocumentType,
        matched_token: String,
        low_confidence: Vec<String>,
        missing: Vec<String>,
        draft: DraftSummary,
    },
    /// Same bytes already uploaded for the case; nothing was re-run.
    Duplicate {
        document_id: Uuid,
        case_key: CaseKey,
        document_type: DocumentType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTransition {
    Commit,
    Discard,
}

/// Write-back from the review UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    #[serde(default)]
    pub resolutions: Vec<FieldResolution>,
    #[serde(default)]
    pub transition: Option<ReviewTransition>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewOutcome {
    Updated { draft: Draft },
    Committed { archive: DraftArchiveEntry, record: LedgerWrite },
    Discarded { archive: DraftArchiveEntry },
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct IntakeService {
    documents: Box<dyn DocumentRepository>,
    pdf: Box<dyn PdfExtractor>,
    engine: ReconciliationEngine,
    drafts: DraftSessionStore,
    case_locks: DashMap<CaseKey, Arc<Mutex<()>>>,
}

impl IntakeService {
    pub fn new(
        documents: Box<dyn DocumentRepository>,
        pdf: Box<dyn PdfExtractor>,
        drafts: DraftSessionStore,
    ) -> Self {
        Self {
            documents,
            pdf,
            engine: ReconciliationEngine::new(),
            drafts,
            case_locks: DashMap::new(),
        }
    }

    /// SQLite documents and the pdf-extract text layer.
    pub fn with_drafts(drafts: DraftSessionStore) -> Self {
        Self::new(
            Box::new(SqliteDocumentRepository::new()),
            Box::new(PdfTextExtractor),
            drafts,
        )
    }

    pub fn drafts(&self) -> &DraftSessionStore {
        &self.drafts
    }

    fn lock_case(&self, key: &CaseKey) -> Arc<Mutex<()>> {
        self.case_locks.entry(key.clone()).or_default().clone()
    }

    // ── Upload ───────────────────────────────────────────────

    pub fn upload(
        &self,
        runtime: &IntakeRuntime,
        conn: &Connection,
        request: UploadRequest,
    ) -> Result<UploadOutcome, IntakeError> {
        let UploadRequest { filename, bytes, case_key } = request;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(IntakeError::TooLarge {
                filename,
                size: bytes.len(),
                max: MAX_UPLOAD_BYTES,
            });
        }

        let (document_type, matched_token) = runtime.classifier.classify_or_reject(&filename)?;

        let pages = read_pages(self.pdf.as_ref(), &bytes).unwrap_or_else(|e| {
            tracing::warn!(filename = %filename, error = %e, "Unreadable upload; all fields missing");
            Vec::new()
        });
        let fields = runtime.extractor.extract(document_type, &pages);
        let extracted_at = self.drafts.now();

        let (key, key_source) = runtime
            .case_keys
            .resolve(case_key.as_deref(), &filename, &fields)
            .ok_or_else(|| IntakeError::CaseKeyUnresolved { filename: filename.clone() })?;

        let lock = self.lock_case(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let ttls = runtime.ttls();

        let existing = match self.drafts.get(&key, ttls) {
            Ok(draft) if draft.state.is_reviewing() => return Err(DraftError::UnderReview(key).into()),
            Ok(draft) => Some(draft),
            Err(DraftError::NotFound(_) | DraftError::Expired(_)) => None,
            Err(e) => return Err(e.into()),
        };
        // an expiry seen by the get above must reach the archive first
        self.flush_exports(conn);

        let closed = archived_document_ids(conn, &key)?;
        // the latest live upload of this type; earlier ones are superseded
        let in_effect = self
            .documents
            .list_by_case_key(conn, &key)?
            .into_iter()
            .rev()
            .find(|stored| {
                !closed.contains(&stored.document.id) && stored.document.document_type == Some(document_type)
            })
            .map(|stored| stored.document.id);
        let content_hash = compute_content_hash(&bytes);
        if let Some(previous) = self.documents.find_by_hash(conn, &key, &content_hash)? {
            if in_effect == Some(previous.document.id) {
                tracing::info!(case_key = %key, filename = %filename, "Duplicate upload ignored");
                return Ok(UploadOutcome::Duplicate {
                    document_id: previous.document.id,
                    case_key: key,
                    document_type: previous.fields.document_type,
                });
            }
        }

        let document = UploadedDocument {
            id: Uuid::new_v4(),
            case_key: key.clone(),
            filename: filename.clone(),
            document_type: Some(document_type),
            content_hash,
            bytes,
            uploaded_at: extracted_at,
            extracted_at: Some(extracted_at),
        };
        self.documents.store(conn, &document, &fields)?;
        tracing::info!(
            case_key = %key,
            filename = %filename,
            document_type = %document_type,
            token = %matched_token,
            "Upload accepted"
        );

        let inputs: Vec<ReconcileInput> = self
            .documents
            .list_by_case_key(conn, &key)?
            .into_iter()
            .filter(|stored| !closed.contains(&stored.document.id))
            .filter_map(|stored| {
                Some(ReconcileInput {
                    document: stored.document.to_ref()?,
                    fields: stored.fields,
                })
            })
            .collect();
        let inputs = latest_per_type(inputs);

        let draft = self
            .engine
            .reconcile(&key, &inputs, existing.as_ref(), self.drafts.now());
        let staged = self.drafts.put(draft, ttls)?;

        let names_with = |confidence: Confidence| {
            fields
                .fields
                .iter()
                .filter(|(_, f)| f.confidence == confidence)
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>()
        };

        Ok(UploadOutcome::Accepted {
            document_id: document.id,
            case_key: key,
            case_key_source: key_source,
            document_type,
            matched_token,
            low_confidence: names_with(Confidence::Low),
            missing: names_with(Confidence::Missing),
            draft: staged.summary(),
        })
    }

    // ── Review ───────────────────────────────────────────────

    pub fn get_draft(&self, runtime: &IntakeRuntime, conn: &Connection, key: &CaseKey) -> Result<Draft, IntakeError> {
        let result = self.drafts.get(key, runtime.ttls());
        self.flush_exports(conn);
        Ok(result?)
    }

    pub fn list_drafts(&self, runtime: &IntakeRuntime, conn: &Connection, filter: &DraftFilter) -> Vec<DraftSummary> {
        let rows = self.drafts.list(filter, runtime.ttls());
        self.flush_exports(conn);
        rows
    }

    pub fn open_review(&self, runtime: &IntakeRuntime, conn: &Connection, key: &CaseKey) -> Result<Draft, IntakeError> {
        let lock = self.lock_case(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.drafts.open_review(key, runtime.ttls());
        self.flush_exports(conn);
        Ok(result?)
    }

    /// Apply resolutions, then the requested transition. A failed commit
    /// leaves the draft under review with the resolutions applied.
    pub fn submit_review(
        &self,
        runtime: &IntakeRuntime,
        conn: &Connection,
        key: &CaseKey,
        submission: &ReviewSubmission,
    ) -> Result<ReviewOutcome, IntakeError> {
        let lock = self.lock_case(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.submit_locked(runtime, conn, key, submission);
        self.flush_exports(conn);
        result
    }

    fn submit_locked(
        &self,
        runtime: &IntakeRuntime,
        conn: &Connection,
        key: &CaseKey,
        submission: &ReviewSubmission,
    ) -> Result<ReviewOutcome, IntakeError> {
        let ttls = runtime.ttls();
        let mut draft = match submission.resolutions.as_slice() {
            [] => self.drafts.get(key, ttls)?,
            resolutions => self.drafts.resolve(key, resolutions, ttls)?,
        };

        match submission.transition {
            None => Ok(ReviewOutcome::Updated { draft }),
            Some(ReviewTransition::Discard) => {
                let archive = self.drafts.discard(key, ttls)?;
                Ok(ReviewOutcome::Discarded { archive })
            }
            Some(ReviewTransition::Commit) => {
                draft = self.drafts.check_commit(key, ttls)?;
                let ledger = ledger_store(runtime);
                let record = ledger
                    .create_or_update(conn, &runtime.config.ledger.record_type, &draft.approved_fields(), key.as_str())
                    .inspect_err(|e| {
                        tracing::error!(case_key = %key, error = %e, "Commit failed; draft stays under review");
                    })?;
                let archive = self.drafts.commit(key, record.record.code.clone(), ttls)?;
                tracing::info!(case_key = %key, code = %record.record.code, "Draft committed");
                Ok(ReviewOutcome::Committed { archive, record })
            }
        }
    }

    // ── Ledger bulk import ───────────────────────────────────

    /// Spreadsheet-sourced rows, already parsed.
    pub fn import_ledger_rows(
        &self,
        runtime: &IntakeRuntime,
        conn: &Connection,
        rows: &[LedgerRecordInput],
    ) -> Result<Vec<LedgerWrite>, IntakeError> {
        Ok(ledger_store(runtime).create_or_update_batch(conn, &runtime.config.ledger.record_type, rows)?)
    }

    pub fn find_ledger_record(
        &self,
        runtime: &IntakeRuntime,
        conn: &Connection,
        natural_key: &str,
    ) -> Result<Option<LedgerRecord>, IntakeError> {
        Ok(ledger_store(runtime).find(conn, &runtime.config.ledger.record_type, natural_key)?)
    }

    // ── Export ───────────────────────────────────────────────

    /// Move queued terminal drafts into the archive table. Entries that
    /// fail to write are queued again for the next call.
    pub fn flush_exports(&self, conn: &Connection) -> usize {
        let mut pending = self.drafts.drain_exports().into_iter();
        let mut written = 0;
        while let Some(entry) = pending.next() {
            if let Err(e) = insert_archive_entry(conn, &entry) {
                tracing::error!(case_key = %entry.case_key, error = %e, "Draft archive write failed");
                let mut retry = vec![entry];
                retry.extend(pending);
                self.drafts.requeue_exports(retry);
                break;
            }
            written += 1;
        }
        if written > 0 {
            tracing::debug!(count = written, "Archived closed drafts");
        }
        written
    }
}

fn ledger_store(runtime: &IntakeRuntime) -> SqliteLedgerStore {
    SqliteLedgerStore::from_config(&runtime.config.ledger, &runtime.config.allocator)
}

/// Documents that already fed a closed draft of the case.
fn archived_document_ids(conn: &Connection, key: &CaseKey) -> Result<HashSet<Uuid>, DatabaseError> {
    Ok(list_archive_entries(conn, key)?
        .into_iter()
        .flat_map(|entry| entry.document_ids)
        .collect())
}
