use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DocumentType;

/// Identifier grouping every document of one procurement case.
///
/// Stored trimmed and upper-cased so "c100" from a filename and "C100"
/// typed by an uploader land on the same draft.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseKey(String);

impl CaseKey {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(|c| c.is_control() || c == '/') {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(&prefix.trim().to_uppercase())
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An uploaded file after classification. Never mutated once stored; a
/// later upload of the same type for the same case supersedes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub id: Uuid,
    pub case_key: CaseKey,
    pub filename: String,
    pub document_type: Option<DocumentType>,
    /// SHA-256 of the raw bytes, base64.
    pub content_hash: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
    pub extracted_at: Option<DateTime<Utc>>,
}

/// Lightweight reference to a contributing document, carried by drafts
/// and the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: Uuid,
    pub document_type: DocumentType,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedDocument {
    pub fn to_ref(&self) -> Option<DocumentRef> {
        Some(DocumentRef {
            id: self.id,
            document_type: self.document_type?,
            filename: self.filename.clone(),
            uploaded_at: self.uploaded_at,
        })
    }
}
