//! In-memory draft store keyed by case.
//!
//! Every access first sweeps expired drafts under the same lock that
//! guards puts, so a put never races an expiry. Drafts leaving the store
//! (committed, discarded, expired) are removed from the live map and
//! queued as archive entries; only metadata survives, never field values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::clock::{Clock, SystemClock};
use super::{DraftError, DraftTtls};
use crate::models::enums::{Confidence, DraftState};
use crate::models::{
    CaseKey, Draft, DraftArchiveEntry, DraftSummary, FieldResolution, FieldState, Provenance,
};

/// Listing filter. Both criteria are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftFilter {
    pub state: Option<DraftState>,
    /// Case-insensitive case-key prefix.
    pub prefix: Option<String>,
}

impl DraftFilter {
    fn matches(&self, draft: &Draft) -> bool {
        self.state.map_or(true, |s| draft.state == s)
            && self.prefix.as_deref().map_or(true, |p| draft.case_key.has_prefix(p))
    }
}

/// Instant at which the applicable TTL of `draft` elapses.
///
/// Open and ReadyForReview drafts expire after the session TTL of
/// inactivity or the absolute draft TTL, whichever comes first. Drafts
/// under review are bounded by the draft TTL only.
pub fn expires_at(draft: &Draft, ttls: DraftTtls) -> DateTime<Utc> {
    let absolute = draft.created_at + ttls.draft;
    if draft.state.is_reviewing() {
        absolute
    } else {
        absolute.min(draft.last_activity + ttls.session)
    }
}

#[derive(Default)]
struct Inner {
    live: HashMap<CaseKey, Draft>,
    /// Case key → expiry instant, so a later `get` can say "expired"
    /// instead of "not found".
    tombstones: HashMap<CaseKey, DateTime<Utc>>,
    exports: Vec<DraftArchiveEntry>,
}

impl Inner {
    fn sweep(&mut self, now: DateTime<Utc>, ttls: DraftTtls) -> Vec<CaseKey> {
        let mut expired = Vec::new();
        for (key, draft) in self.live.iter_mut() {
            let deadline = expires_at(draft, ttls);
            draft.expires_at = deadline;
            if now > deadline {
                expired.push(key.clone());
            }
        }

        for key in &expired {
            if let Some(mut draft) = self.live.remove(key) {
                tracing::info!(case_key = %key, from = %draft.state, "Draft expired");
                draft.state = DraftState::Expired;
                self.exports.push(DraftArchiveEntry::from_draft(&draft, now, None));
                self.tombstones.insert(key.clone(), now);
            }
        }

        self.tombstones.retain(|_, at| *at + ttls.draft > now);
        expired
    }

    fn live_mut(&mut self, key: &CaseKey) -> Result<&mut Draft, DraftError> {
        if self.tombstones.contains_key(key) {
            return Err(DraftError::Expired(key.clone()));
        }
        self.live.get_mut(key).ok_or_else(|| DraftError::NotFound(key.clone()))
    }

    /// Move a live draft into a terminal state and queue its archive entry.
    fn close(
        &mut self,
        key: &CaseKey,
        next: DraftState,
        ledger_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DraftArchiveEntry, DraftError> {
        let draft = self.live_mut(key)?;
        check_transition(draft, next)?;
        if next == DraftState::Committed && !draft.is_committable() {
            return Err(DraftError::CommitBlocked {
                case_key: key.clone(),
                fields: draft.blocking_fields(),
            });
        }

        let mut draft = self
            .live
            .remove(key)
            .ok_or_else(|| DraftError::NotFound(key.clone()))?;
        tracing::info!(case_key = %key, from = %draft.state, to = %next, "Draft closed");
        draft.state = next;
        let entry = DraftArchiveEntry::from_draft(&draft, now, ledger_code);
        self.exports.push(entry.clone());
        Ok(entry)
    }
}

fn check_transition(draft: &Draft, next: DraftState) -> Result<(), DraftError> {
    if draft.state.can_transition_to(next) {
        Ok(())
    } else {
        Err(DraftError::InvalidTransition {
            case_key: draft.case_key.clone(),
            from: draft.state,
            to: next,
        })
    }
}

pub struct DraftSessionStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl DraftSessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Lock and sweep. Every public operation starts here.
    fn swept(&self, ttls: DraftTtls) -> (MutexGuard<'_, Inner>, DateTime<Utc>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.sweep(now, ttls);
        (inner, now)
    }

    /// Run the expiry sweep alone. Returns the keys that expired.
    pub fn expire(&self, ttls: DraftTtls) -> Vec<CaseKey> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.sweep(now, ttls)
    }

    /// Stage a reconciled draft, replacing the live draft for its case.
    ///
    /// Only Open or ReadyForReview drafts are staged this way; a draft under
    /// review blocks the put.
    pub fn put(&self, mut draft: Draft, ttls: DraftTtls) -> Result<Draft, DraftError> {
        let (mut inner, now) = self.swept(ttls);
        let key = draft.case_key.clone();

        if let Some(current) = inner.live.get(&key) {
            if current.state.is_reviewing() {
                return Err(DraftError::UnderReview(key));
            }
        }
        if !draft.state.accepts_documents() {
            return Err(DraftError::InvalidTransition {
                case_key: key,
                from: inner.live.get(&draft.case_key).map_or(draft.state, |d| d.state),
                to: draft.state,
            });
        }

        draft.last_activity = now;
        draft.expires_at = expires_at(&draft, ttls);
        inner.tombstones.remove(&key);
        tracing::info!(
            case_key = %key,
            state = %draft.state,
            documents = draft.documents.len(),
            "Draft staged"
        );
        inner.live.insert(key, draft.clone());
        Ok(draft)
    }

    pub fn get(&self, key: &CaseKey, ttls: DraftTtls) -> Result<Draft, DraftError> {
        let (mut inner, _) = self.swept(ttls);
        inner.live_mut(key).map(|d| d.clone())
    }

    /// Live drafts matching `filter`, ordered by case key.
    pub fn list(&self, filter: &DraftFilter, ttls: DraftTtls) -> Vec<DraftSummary> {
        let (inner, _) = self.swept(ttls);
        let mut rows: Vec<DraftSummary> = inner
            .live
            .values()
            .filter(|d| filter.matches(d))
            .map(Draft::summary)
            .collect();
        rows.sort_by(|a, b| a.case_key.cmp(&b.case_key));
        rows
    }

    /// A reviewer opened the draft.
    pub fn open_review(&self, key: &CaseKey, ttls: DraftTtls) -> Result<Draft, DraftError> {
        let (mut inner, now) = self.swept(ttls);
        let draft = inner.live_mut(key)?;
        check_transition(draft, DraftState::UnderReview)?;
        tracing::info!(case_key = %key, from = %draft.state, to = "under_review", "Draft transition");
        draft.state = DraftState::UnderReview;
        draft.last_activity = now;
        draft.expires_at = expires_at(draft, ttls);
        Ok(draft.clone())
    }

    /// Apply reviewer values. All-or-nothing: an unknown field rejects the
    /// whole submission.
    pub fn resolve(
        &self,
        key: &CaseKey,
        resolutions: &[FieldResolution],
        ttls: DraftTtls,
    ) -> Result<Draft, DraftError> {
        let (mut inner, now) = self.swept(ttls);
        let draft = inner.live_mut(key)?;
        if !draft.state.is_reviewing() {
            return Err(DraftError::InvalidTransition {
                case_key: key.clone(),
                from: draft.state,
                to: DraftState::UnderReview,
            });
        }
        if let Some(unknown) = resolutions.iter().find(|r| !draft.fields.contains_key(&r.field)) {
            return Err(DraftError::UnknownField {
                case_key: key.clone(),
                field: unknown.field.clone(),
            });
        }

        for resolution in resolutions {
            if let Some(field) = draft.fields.get_mut(&resolution.field) {
                field.state = FieldState::Resolved {
                    value: resolution.value.clone(),
                    provenance: vec![Provenance::Reviewer],
                };
                field.confidence = Confidence::High;
            }
        }
        if !resolutions.is_empty() {
            tracing::info!(case_key = %key, resolved = resolutions.len(), "Reviewer resolved fields");
        }
        draft.last_activity = now;
        Ok(draft.clone())
    }

    /// The draft as it would be committed, or why it cannot be.
    pub fn check_commit(&self, key: &CaseKey, ttls: DraftTtls) -> Result<Draft, DraftError> {
        let (mut inner, _) = self.swept(ttls);
        let draft = inner.live_mut(key)?;
        check_transition(draft, DraftState::Committed)?;
        if !draft.is_committable() {
            return Err(DraftError::CommitBlocked {
                case_key: key.clone(),
                fields: draft.blocking_fields(),
            });
        }
        Ok(draft.clone())
    }

    /// Mark committed after the ledger accepted the record.
    pub fn commit(
        &self,
        key: &CaseKey,
        ledger_code: String,
        ttls: DraftTtls,
    ) -> Result<DraftArchiveEntry, DraftError> {
        let (mut inner, now) = self.swept(ttls);
        inner.close(key, DraftState::Committed, Some(ledger_code), now)
    }

    pub fn discard(&self, key: &CaseKey, ttls: DraftTtls) -> Result<DraftArchiveEntry, DraftError> {
        let (mut inner, now) = self.swept(ttls);
        inner.close(key, DraftState::Discarded, None, now)
    }

    /// Take every queued archive entry.
    pub fn drain_exports(&self) -> Vec<DraftArchiveEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.exports.drain(..).collect()
    }

    /// Put back entries whose export failed; they are retried on the next drain.
    pub fn requeue_exports(&self, entries: Vec<DraftArchiveEntry>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.exports.splice(0..0, entries);
    }

    pub fn pending_exports(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .exports
            .len()
    }
}

impl Default for DraftSessionStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
