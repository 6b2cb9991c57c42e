use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::{CaseKey, DocumentRef};
use super::enums::{Confidence, DocumentType, DraftState};
use super::field::FieldValue;

/// Who supplied a merged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "source", content = "document_type", rename_all = "snake_case")]
pub enum Provenance {
    Document(DocumentType),
    Reviewer,
}

/// One distinct value proposed for a conflicted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub value: FieldValue,
    pub confidence: Confidence,
    pub provenance: Vec<Provenance>,
}

/// Merge outcome for one field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldState {
    Resolved {
        value: FieldValue,
        provenance: Vec<Provenance>,
    },
    Conflicted {
        candidates: Vec<Candidate>,
    },
    Missing {
        /// Document types that have a rule for the field but found no anchor.
        provenance: Vec<Provenance>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedField {
    pub state: FieldState,
    pub confidence: Confidence,
    pub required: bool,
}

impl MergedField {
    pub fn is_conflicted(&self) -> bool {
        matches!(self.state, FieldState::Conflicted { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.state, FieldState::Missing { .. })
    }

    pub fn resolved_value(&self) -> Option<&FieldValue> {
        match &self.state {
            FieldState::Resolved { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Every provenance entry mentioned by the field, candidates included.
    pub fn provenance(&self) -> Vec<Provenance> {
        match &self.state {
            FieldState::Resolved { provenance, .. } | FieldState::Missing { provenance } => {
                provenance.clone()
            }
            FieldState::Conflicted { candidates } => {
                let mut all: Vec<Provenance> =
                    candidates.iter().flat_map(|c| c.provenance.iter().copied()).collect();
                all.sort();
                all.dedup();
                all
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Satisfied,
    Conflicted,
    Missing,
}

/// Staged, reviewable merge of every document of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub case_key: CaseKey,
    pub state: DraftState,
    pub documents: Vec<DocumentRef>,
    pub fields: BTreeMap<String, MergedField>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Earliest instant at which the applicable TTL elapses. Recomputed by
    /// the store on every put.
    pub expires_at: DateTime<Utc>,
}

impl Draft {
    /// Status of each required field, keyed by field name.
    pub fn requirements(&self) -> BTreeMap<String, RequirementStatus> {
        self.fields
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(name, f)| {
                let status = match f.state {
                    FieldState::Resolved { .. } => RequirementStatus::Satisfied,
                    FieldState::Conflicted { .. } => RequirementStatus::Conflicted,
                    FieldState::Missing { .. } => RequirementStatus::Missing,
                };
                (name.clone(), status)
            })
            .collect()
    }

    /// Fields that stop a commit, in name order: every conflicted field,
    /// required or not, and every missing required field.
    pub fn blocking_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, f)| f.is_conflicted() || (f.required && f.is_missing()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_missing_required(&self) -> bool {
        self.fields.values().any(|f| f.required && f.is_missing())
    }

    pub fn conflicted_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.is_conflicted())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_committable(&self) -> bool {
        self.blocking_fields().is_empty()
    }

    /// Resolved values only, the shape handed to the ledger on commit.
    pub fn approved_fields(&self) -> BTreeMap<String, FieldValue> {
        self.fields
            .iter()
            .filter_map(|(name, f)| f.resolved_value().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub fn summary(&self) -> DraftSummary {
        DraftSummary {
            case_key: self.case_key.clone(),
            state: self.state,
            document_count: self.documents.len(),
            conflicted: self.conflicted_fields().len(),
            missing_required: self.fields.values().filter(|f| f.required && f.is_missing()).count(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// A reviewer-supplied value for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldResolution {
    pub field: String,
    pub value: FieldValue,
}

/// Row returned by draft listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub case_key: CaseKey,
    pub state: DraftState,
    pub document_count: usize,
    pub conflicted: usize,
    pub missing_required: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Archived metadata of a draft that left the live store. Field values
/// are not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftArchiveEntry {
    pub draft_id: Uuid,
    pub case_key: CaseKey,
    pub final_state: DraftState,
    pub document_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Ledger code when committed.
    pub ledger_code: Option<String>,
}

impl DraftArchiveEntry {
    pub fn from_draft(draft: &Draft, closed_at: DateTime<Utc>, ledger_code: Option<String>) -> Self {
        Self {
            draft_id: draft.id,
            case_key: draft.case_key.clone(),
            final_state: draft.state,
            document_ids: draft.documents.iter().map(|d| d.id).collect(),
            created_at: draft.created_at,
            closed_at,
            ledger_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(state: FieldState, required: bool) -> MergedField {
        let confidence = match state {
            FieldState::Resolved { .. } => Confidence::High,
            FieldState::Conflicted { .. } => Confidence::Low,
            FieldState::Missing { .. } => Confidence::Missing,
        };
        MergedField { state, confidence, required }
    }

    fn draft_with(fields: Vec<(&str, MergedField)>) -> Draft {
        let now = Utc::now();
        Draft {
            id: Uuid::new_v4(),
            case_key: CaseKey::new("C1").unwrap(),
            state: DraftState::Open,
            documents: vec![],
            fields: fields.into_iter().map(|(n, f)| (n.to_string(), f)).collect(),
            created_at: now,
            last_activity: now,
            expires_at: now,
        }
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.into())
    }

    #[test]
    fn requirements_cover_only_required_fields() {
        let draft = draft_with(vec![
            (
                "project_name",
                field(
                    FieldState::Resolved {
                        value: text("道路工程"),
                        provenance: vec![Provenance::Document(DocumentType::Announcement)],
                    },
                    true,
                ),
            ),
            ("bid_deadline", field(FieldState::Missing { provenance: vec![] }, false)),
        ]);
        let reqs = draft.requirements();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs["project_name"], RequirementStatus::Satisfied);
        assert!(draft.is_committable());
    }

    #[test]
    fn conflicted_required_field_blocks_commit() {
        let draft = draft_with(vec![(
            "project_name",
            field(
                FieldState::Conflicted {
                    candidates: vec![
                        Candidate {
                            value: text("甲"),
                            confidence: Confidence::High,
                            provenance: vec![Provenance::Document(DocumentType::Announcement)],
                        },
                        Candidate {
                            value: text("乙"),
                            confidence: Confidence::High,
                            provenance: vec![Provenance::Document(
                                DocumentType::PurchaseRequestApproval,
                            )],
                        },
                    ],
                },
                true,
            ),
        )]);
        assert!(!draft.is_committable());
        assert_eq!(draft.blocking_fields(), vec!["project_name".to_string()]);
        assert_eq!(draft.field_provenance_count("project_name"), 2);
        assert!(draft.approved_fields().is_empty());
    }

    #[test]
    fn optional_conflict_blocks_commit_until_resolved() {
        let conflict = FieldState::Conflicted {
            candidates: vec![
                Candidate {
                    value: text("2024-06-01"),
                    confidence: Confidence::High,
                    provenance: vec![Provenance::Document(DocumentType::Announcement)],
                },
                Candidate {
                    value: text("2024-06-08"),
                    confidence: Confidence::High,
                    provenance: vec![Provenance::Document(DocumentType::ResultApproval)],
                },
            ],
        };
        let mut draft = draft_with(vec![
            ("bid_deadline", field(conflict, false)),
            ("applicant_department", field(FieldState::Missing { provenance: vec![] }, false)),
        ]);
        assert!(draft.requirements().is_empty());
        assert!(!draft.is_committable());
        assert_eq!(draft.blocking_fields(), vec!["bid_deadline".to_string()]);

        draft.fields.get_mut("bid_deadline").unwrap().state = FieldState::Resolved {
            value: text("2024-06-08"),
            provenance: vec![Provenance::Reviewer],
        };
        assert!(draft.is_committable());
        assert_eq!(draft.approved_fields()["bid_deadline"], text("2024-06-08"));
    }

    impl Draft {
        fn field_provenance_count(&self, name: &str) -> usize {
            self.fields[name].provenance().len()
        }
    }

    #[test]
    fn provenance_serializes_tagged() {
        let json = serde_json::to_value(Provenance::Document(DocumentType::ResultApproval)).unwrap();
        assert_eq!(json["source"], "document");
        assert_eq!(json["document_type"], "result_approval");
        let json = serde_json::to_value(Provenance::Reviewer).unwrap();
        assert_eq!(json["source"], "reviewer");
    }
}
