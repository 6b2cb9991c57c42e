use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::DraftState;
use crate::models::{CaseKey, DraftArchiveEntry};

// ═══════════════════════════════════════════
// Draft archive
// ═══════════════════════════════════════════

/// Record a draft that left the live store. Re-archiving the same draft id
/// is a no-op so a retried drain cannot fail on rows it already wrote.
pub fn insert_archive_entry(conn: &Connection, entry: &DraftArchiveEntry) -> Result<(), DatabaseError> {
    if !entry.final_state.is_terminal() {
        return Err(DatabaseError::ConstraintViolation(format!(
            "cannot archive draft {} in state {}",
            entry.draft_id, entry.final_state
        )));
    }
    let document_ids: Vec<String> = entry.document_ids.iter().map(Uuid::to_string).collect();
    conn.execute(
        "INSERT OR IGNORE INTO draft_archive
         (draft_id, case_key, final_state, document_ids, ledger_code, created_at, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.draft_id.to_string(),
            entry.case_key.as_str(),
            entry.final_state.as_str(),
            serde_json::to_string(&document_ids)?,
            entry.ledger_code,
            entry.created_at,
            entry.closed_at,
        ],
    )?;
    Ok(())
}

struct ArchiveRow {
    draft_id: String,
    case_key: String,
    final_state: String,
    document_ids: String,
    ledger_code: Option<String>,
    created_at: DateTime<Utc>,
    closed_at: DateTime<Utc>,
}

fn archive_from_row(row: ArchiveRow) -> Result<DraftArchiveEntry, DatabaseError> {
    let ids: Vec<String> = serde_json::from_str(&row.document_ids)?;
    let document_ids = ids
        .iter()
        .map(|s| Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DraftArchiveEntry {
        draft_id: Uuid::parse_str(&row.draft_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        case_key: CaseKey::new(&row.case_key)
            .ok_or_else(|| DatabaseError::ConstraintViolation(format!("bad case key: {}", row.case_key)))?,
        final_state: DraftState::from_str(&row.final_state)?,
        document_ids,
        ledger_code: row.ledger_code,
        created_at: row.created_at,
        closed_at: row.closed_at,
    })
}

/// Archived drafts of one case, oldest first.
pub fn list_archive_entries(conn: &Connection, case_key: &CaseKey) -> Result<Vec<DraftArchiveEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT draft_id, case_key, final_state, document_ids, ledger_code, created_at, closed_at
         FROM draft_archive WHERE case_key = ?1
         ORDER BY closed_at ASC",
    )?;
    let rows = stmt.query_map(params![case_key.as_str()], |row| {
        Ok(ArchiveRow {
            draft_id: row.get(0)?,
            case_key: row.get(1)?,
            final_state: row.get(2)?,
            document_ids: row.get(3)?,
            ledger_code: row.get(4)?,
            created_at: row.get(5)?,
            closed_at: row.get(6)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(archive_from_row(row?)?);
    }
    Ok(entries)
}
