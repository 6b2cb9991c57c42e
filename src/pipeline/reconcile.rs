//! Cross-document reconciliation.
//!
//! Field sets of one case are merged field by field. A field reported by
//! a single document is carried through; agreeing reports (by normalized
//! value) merge with the best confidence; disagreeing reports become a
//! `Conflicted` field that keeps every candidate with its provenance.
//! Nothing is dropped during a merge.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::enums::{Confidence, DocumentType, DraftState};
use crate::models::{
    Candidate, CaseKey, DocumentRef, Draft, ExtractedFieldSet, FieldState, MergedField, Provenance,
};

/// One contributing document with its extraction.
#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub document: DocumentRef,
    pub fields: ExtractedFieldSet,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merge `inputs` into a draft for `case_key`.
    ///
    /// When `existing` is given and still accepts documents, its identity
    /// and creation time are kept and its fields are recomputed in place.
    /// Otherwise a fresh draft is started.
    pub fn reconcile(
        &self,
        case_key: &CaseKey,
        inputs: &[ReconcileInput],
        existing: Option<&Draft>,
        now: DateTime<Utc>,
    ) -> Draft {
        let sets: Vec<&ExtractedFieldSet> = inputs.iter().map(|i| &i.fields).collect();
        let fields = merge_fields(&sets);
        let state = derive_state(&fields);

        for (name, field) in &fields {
            if field.is_conflicted() {
                tracing::warn!(case_key = %case_key, field = %name, "Conflicting field values");
            }
        }

        let (id, created_at) = match existing {
            Some(draft) if draft.state.accepts_documents() => (draft.id, draft.created_at),
            _ => (Uuid::new_v4(), now),
        };

        Draft {
            id,
            case_key: case_key.clone(),
            state,
            documents: inputs.iter().map(|i| i.document.clone()).collect(),
            fields,
            created_at,
            last_activity: now,
            expires_at: now,
        }
    }
}

/// Keep only the most recent input per document type, preserving the
/// relative order of the survivors. `inputs` must be in upload order.
pub fn latest_per_type(inputs: Vec<ReconcileInput>) -> Vec<ReconcileInput> {
    let mut last_index: BTreeMap<DocumentType, usize> = BTreeMap::new();
    for (i, input) in inputs.iter().enumerate() {
        last_index.insert(input.document.document_type, i);
    }
    let keep: BTreeSet<usize> = last_index.into_values().collect();
    inputs
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, input)| input)
        .collect()
}

/// Open while any required field is still Missing, ReadyForReview otherwise.
pub fn derive_state(fields: &BTreeMap<String, MergedField>) -> DraftState {
    if fields.values().any(|f| f.required && f.is_missing()) {
        DraftState::Open
    } else {
        DraftState::ReadyForReview
    }
}

/// Merge every field name reported by any set.
pub fn merge_fields(sets: &[&ExtractedFieldSet]) -> BTreeMap<String, MergedField> {
    let names: BTreeSet<&str> = sets
        .iter()
        .flat_map(|s| s.fields.keys().map(String::as_str))
        .collect();

    names
        .into_iter()
        .map(|name| {
            let required = sets.iter().any(|s| s.is_required(name));
            (name.to_string(), merge_one(name, sets, required))
        })
        .collect()
}

fn merge_one(name: &str, sets: &[&ExtractedFieldSet], required: bool) -> MergedField {
    // distinct normalized values in first-reported order
    let mut groups: Vec<(String, Candidate)> = Vec::new();
    let mut missing_from: Vec<Provenance> = Vec::new();

    for set in sets {
        let Some(field) = set.get(name) else { continue };
        let provenance = Provenance::Document(set.document_type);
        let Some(value) = field.value.as_ref().filter(|_| !field.is_missing()) else {
            missing_from.push(provenance);
            continue;
        };

        let key = value.normalized_key();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, candidate)) => {
                candidate.confidence = candidate.confidence.max(field.confidence);
                candidate.provenance.push(provenance);
            }
            None => groups.push((
                key,
                Candidate {
                    value: value.clone(),
                    confidence: field.confidence,
                    provenance: vec![provenance],
                },
            )),
        }
    }

    let mut candidates: Vec<Candidate> = groups.into_iter().map(|(_, c)| c).collect();
    match candidates.len() {
        0 => MergedField {
            state: FieldState::Missing { provenance: missing_from },
            confidence: Confidence::Missing,
            required,
        },
        1 => {
            let Candidate { value, confidence, provenance } = candidates.remove(0);
            MergedField {
                state: FieldState::Resolved { value, provenance },
                confidence,
                required,
            }
        }
        _ => MergedField {
            state: FieldState::Conflicted { candidates },
            confidence: Confidence::Low,
            required,
        },
    }
}
