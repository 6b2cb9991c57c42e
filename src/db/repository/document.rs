use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::DocumentType;
use crate::models::{CaseKey, ExtractedFieldSet, UploadedDocument};

/// A persisted upload with the field set extracted from it.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document: UploadedDocument,
    pub fields: ExtractedFieldSet,
}

/// Document repository: persists classified uploads and their extraction
/// results, grouped by case key.
pub trait DocumentRepository: Send + Sync {
    fn store(
        &self,
        conn: &Connection,
        doc: &UploadedDocument,
        fields: &ExtractedFieldSet,
    ) -> Result<(), DatabaseError>;

    /// Every document of the case, in upload order.
    fn list_by_case_key(
        &self,
        conn: &Connection,
        case_key: &CaseKey,
    ) -> Result<Vec<StoredDocument>, DatabaseError>;

    fn find_by_hash(
        &self,
        conn: &Connection,
        case_key: &CaseKey,
        content_hash: &str,
    ) -> Result<Option<StoredDocument>, DatabaseError>;
}

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository;

impl SqliteDocumentRepository {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDocumentRepository {
    fn default() -> Self {
        Self::new()
    }
}

const DOCUMENT_COLUMNS: &str = "id, case_key, filename, document_type, content_hash, bytes,
     extracted_fields, uploaded_at, extracted_at";

struct DocumentRow {
    id: String,
    case_key: String,
    filename: String,
    document_type: String,
    content_hash: String,
    bytes: Vec<u8>,
    extracted_fields: String,
    uploaded_at: DateTime<Utc>,
    extracted_at: Option<DateTime<Utc>>,
}

impl DocumentRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            case_key: row.get(1)?,
            filename: row.get(2)?,
            document_type: row.get(3)?,
            content_hash: row.get(4)?,
            bytes: row.get(5)?,
            extracted_fields: row.get(6)?,
            uploaded_at: row.get(7)?,
            extracted_at: row.get(8)?,
        })
    }
}

fn document_from_row(row: DocumentRow) -> Result<StoredDocument, DatabaseError> {
    let case_key = CaseKey::new(&row.case_key)
        .ok_or_else(|| DatabaseError::ConstraintViolation(format!("bad case key: {}", row.case_key)))?;
    let document_type = DocumentType::from_str(&row.document_type)?;
    let fields: ExtractedFieldSet = serde_json::from_str(&row.extracted_fields)?;

    Ok(StoredDocument {
        document: UploadedDocument {
            id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            case_key,
            filename: row.filename,
            document_type: Some(document_type),
            content_hash: row.content_hash,
            bytes: row.bytes,
            uploaded_at: row.uploaded_at,
            extracted_at: row.extracted_at,
        },
        fields,
    })
}

impl DocumentRepository for SqliteDocumentRepository {
    fn store(
        &self,
        conn: &Connection,
        doc: &UploadedDocument,
        fields: &ExtractedFieldSet,
    ) -> Result<(), DatabaseError> {
        let document_type = doc.document_type.ok_or_else(|| {
            DatabaseError::ConstraintViolation(format!("document {} is unclassified", doc.id))
        })?;
        if document_type != fields.document_type {
            return Err(DatabaseError::ConstraintViolation(format!(
                "document {} is {} but fields are for {}",
                doc.id, document_type, fields.document_type
            )));
        }
        let fields_json = serde_json::to_string(fields)?;

        conn.execute(
            "INSERT INTO documents (id, case_key, filename, document_type, content_hash, bytes,
             extracted_fields, uploaded_at, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                doc.id.to_string(),
                doc.case_key.as_str(),
                doc.filename,
                document_type.as_str(),
                doc.content_hash,
                doc.bytes,
                fields_json,
                doc.uploaded_at,
                doc.extracted_at,
            ],
        )?;
        Ok(())
    }

    fn list_by_case_key(
        &self,
        conn: &Connection,
        case_key: &CaseKey,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE case_key = ?1
             ORDER BY uploaded_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![case_key.as_str()], DocumentRow::read)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(document_from_row(row?)?);
        }
        Ok(docs)
    }

    fn find_by_hash(
        &self,
        conn: &Connection,
        case_key: &CaseKey,
        content_hash: &str,
    ) -> Result<Option<StoredDocument>, DatabaseError> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents
                     WHERE case_key = ?1 AND content_hash = ?2
                     ORDER BY uploaded_at DESC, rowid DESC LIMIT 1"
                ),
                params![case_key.as_str(), content_hash],
                DocumentRow::read,
            )
            .optional()?;
        row.map(document_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{ExtractedField, FieldValue};
    use chrono::Duration;

    fn make_doc(case: &str, doc_type: DocumentType, hash: &str, at: DateTime<Utc>) -> (UploadedDocument, ExtractedFieldSet) {
        let doc = UploadedDocument {
            id: Uuid::new_v4(),
            case_key: CaseKey::new(case).unwrap(),
            filename: format!("{case}_{}.pdf", doc_type.as_str()),
            document_type: Some(doc_type),
            content_hash: hash.into(),
            bytes: b"%PDF-1.4 test".to_vec(),
            uploaded_at: at,
            extracted_at: Some(at),
        };
        let mut fields = ExtractedFieldSet::new(doc_type);
        fields.insert(
            "project_name",
            ExtractedField::high(FieldValue::Text("道路工程".into()), doc_type),
        );
        (doc, fields)
    }

    #[test]
    fn store_and_list_in_upload_order() {
        let conn = open_memory_database().unwrap();
        let repo = SqliteDocumentRepository::new();
        let t0 = Utc::now();

        let (late, late_fields) = make_doc("C100", DocumentType::Announcement, "h2", t0 + Duration::seconds(5));
        let (early, early_fields) = make_doc("C100", DocumentType::ControlPriceApproval, "h1", t0);
        let (other, other_fields) = make_doc("C200", DocumentType::Announcement, "h3", t0);
        repo.store(&conn, &late, &late_fields).unwrap();
        repo.store(&conn, &early, &early_fields).unwrap();
        repo.store(&conn, &other, &other_fields).unwrap();

        let listed = repo.list_by_case_key(&conn, &CaseKey::new("C100").unwrap()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].document.id, early.id);
        assert_eq!(listed[1].document.id, late.id);
        assert_eq!(listed[1].fields, late_fields);
        assert_eq!(listed[0].document.bytes, early.bytes);
    }

    #[test]
    fn find_by_hash_is_scoped_to_case() {
        let conn = open_memory_database().unwrap();
        let repo = SqliteDocumentRepository::new();
        let (doc, fields) = make_doc("C100", DocumentType::Announcement, "same", Utc::now());
        repo.store(&conn, &doc, &fields).unwrap();

        let hit = repo.find_by_hash(&conn, &CaseKey::new("C100").unwrap(), "same").unwrap();
        assert_eq!(hit.unwrap().document.id, doc.id);
        let miss = repo.find_by_hash(&conn, &CaseKey::new("C999").unwrap(), "same").unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn store_rejects_mismatched_field_set() {
        let conn = open_memory_database().unwrap();
        let repo = SqliteDocumentRepository::new();
        let (doc, _) = make_doc("C100", DocumentType::Announcement, "h", Utc::now());
        let wrong = ExtractedFieldSet::new(DocumentType::ResultApproval);
        assert!(matches!(
            repo.store(&conn, &doc, &wrong),
            Err(DatabaseError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn repository_is_object_safe() {
        let repo: Box<dyn DocumentRepository> = Box::new(SqliteDocumentRepository::new());
        let conn = open_memory_database().unwrap();
        assert!(repo.list_by_case_key(&conn, &CaseKey::new("X").unwrap()).unwrap().is_empty());
    }
}
