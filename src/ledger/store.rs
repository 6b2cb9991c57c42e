//! Ledger store: committed records, idempotent by natural key.
//!
//! A record is created once per `(record_type, natural_key)`. Re-importing
//! the same natural key updates the record's fields in place and keeps its
//! ordinal, code and date; only genuinely new records reach the allocator.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::code::{partition_key, record_code, record_date};
use super::sequence::{append, SequenceAllocator};
use super::LedgerError;
use crate::config::{AllocatorConfig, LedgerConfig};
use crate::models::FieldValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: Uuid,
    pub record_type: String,
    pub partition_key: String,
    pub natural_key: String,
    pub ordinal: i64,
    pub code: String,
    pub record_date: NaiveDate,
    pub fields: BTreeMap<String, FieldValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerWrite {
    pub outcome: WriteOutcome,
    pub record: LedgerRecord,
}

/// One row of a bulk import. Without an explicit date the record is dated
/// from its fields like a committed draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecordInput {
    pub natural_key: String,
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    pub fields: BTreeMap<String, FieldValue>,
}

pub trait LedgerStore: Send + Sync {
    fn create_or_update(
        &self,
        conn: &Connection,
        record_type: &str,
        fields: &BTreeMap<String, FieldValue>,
        natural_key: &str,
    ) -> Result<LedgerWrite, LedgerError>;

    /// One write per input row, in input order, all in one transaction.
    fn create_or_update_batch(
        &self,
        conn: &Connection,
        record_type: &str,
        rows: &[LedgerRecordInput],
    ) -> Result<Vec<LedgerWrite>, LedgerError>;

    fn find(
        &self,
        conn: &Connection,
        record_type: &str,
        natural_key: &str,
    ) -> Result<Option<LedgerRecord>, LedgerError>;
}

pub struct SqliteLedgerStore {
    allocator: SequenceAllocator,
    code_prefix: String,
    date_fields: Vec<String>,
}

impl SqliteLedgerStore {
    pub fn new(allocator: SequenceAllocator, code_prefix: impl Into<String>, date_fields: Vec<String>) -> Self {
        Self {
            allocator,
            code_prefix: code_prefix.into(),
            date_fields,
        }
    }

    pub fn from_config(ledger: &LedgerConfig, allocator: &AllocatorConfig) -> Self {
        Self::new(
            SequenceAllocator::from_config(allocator),
            ledger.code_prefix.clone(),
            ledger.date_fields.clone(),
        )
    }

    fn date_for(&self, explicit: Option<NaiveDate>, fields: &BTreeMap<String, FieldValue>, today: NaiveDate) -> NaiveDate {
        explicit.unwrap_or_else(|| record_date(fields, &self.date_fields, today))
    }

    /// Apply deduplicated rows inside an open transaction.
    fn write_rows(
        &self,
        conn: &Connection,
        record_type: &str,
        rows: &[PendingRow<'_>],
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerWrite>, LedgerError> {
        let mut writes: Vec<Option<LedgerWrite>> = vec![None; rows.len()];
        // partition → (row index, date), input order preserved
        let mut new_rows: BTreeMap<String, Vec<(usize, NaiveDate)>> = BTreeMap::new();

        for (index, row) in rows.iter().enumerate() {
            match find_record(conn, record_type, row.natural_key)? {
                Some(existing) => {
                    let record = update_fields(conn, existing, row.fields, now)?;
                    writes[index] = Some(LedgerWrite { outcome: WriteOutcome::Updated, record });
                }
                None => {
                    let date = self.date_for(row.record_date, row.fields, now.date_naive());
                    new_rows
                        .entry(partition_key(record_type, date))
                        .or_default()
                        .push((index, date));
                }
            }
        }

        for (partition, items) in &new_rows {
            let entries: Vec<(NaiveDate, Option<&str>)> = items
                .iter()
                .map(|(index, date)| (*date, Some(rows[*index].natural_key)))
                .collect();
            let ordinals = append(conn, partition, &entries, now)?;

            for ((index, date), ordinal) in items.iter().zip(ordinals) {
                let row = &rows[*index];
                let record = LedgerRecord {
                    id: Uuid::new_v4(),
                    record_type: record_type.to_string(),
                    partition_key: partition.clone(),
                    natural_key: row.natural_key.to_string(),
                    ordinal,
                    code: record_code(&self.code_prefix, *date, ordinal),
                    record_date: *date,
                    fields: row.fields.clone(),
                    created_at: now,
                    updated_at: now,
                };
                insert_record(conn, &record)?;
                writes[*index] = Some(LedgerWrite { outcome: WriteOutcome::Created, record });
            }
        }

        writes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| LedgerError::InvalidRecord("row left unwritten".into()))
    }
}

/// A batch row after in-batch deduplication.
#[derive(Clone, Copy)]
struct PendingRow<'a> {
    natural_key: &'a str,
    record_date: Option<NaiveDate>,
    fields: &'a BTreeMap<String, FieldValue>,
}

impl LedgerStore for SqliteLedgerStore {
    fn create_or_update(
        &self,
        conn: &Connection,
        record_type: &str,
        fields: &BTreeMap<String, FieldValue>,
        natural_key: &str,
    ) -> Result<LedgerWrite, LedgerError> {
        let row = LedgerRecordInput {
            natural_key: natural_key.to_string(),
            record_date: None,
            fields: fields.clone(),
        };
        self.create_or_update_batch(conn, record_type, std::slice::from_ref(&row))?
            .pop()
            .ok_or_else(|| LedgerError::InvalidRecord("no write produced".into()))
    }

    fn create_or_update_batch(
        &self,
        conn: &Connection,
        record_type: &str,
        rows: &[LedgerRecordInput],
    ) -> Result<Vec<LedgerWrite>, LedgerError> {
        if record_type.trim().is_empty() {
            return Err(LedgerError::InvalidRecord("record type is empty".into()));
        }
        if let Some(blank) = rows.iter().position(|r| r.natural_key.trim().is_empty()) {
            return Err(LedgerError::InvalidRecord(format!("row {blank} has an empty natural key")));
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // A key repeated in the batch updates its first occurrence: the last
        // fields win, the first date stands.
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut unique: Vec<PendingRow<'_>> = Vec::new();
        let mut row_to_unique = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.natural_key.as_str();
            match first_seen.get(key) {
                Some(&i) => {
                    unique[i].fields = &row.fields;
                    row_to_unique.push(i);
                }
                None => {
                    first_seen.insert(key, unique.len());
                    row_to_unique.push(unique.len());
                    unique.push(PendingRow {
                        natural_key: key,
                        record_date: row.record_date,
                        fields: &row.fields,
                    });
                }
            }
        }

        let now = Utc::now();
        let today = now.date_naive();
        let dates: Vec<NaiveDate> = unique
            .iter()
            .map(|r| self.date_for(r.record_date, r.fields, today))
            .collect();
        let partitions: BTreeSet<String> = dates.iter().map(|d| partition_key(record_type, *d)).collect();
        let partition = partitions.into_iter().collect::<Vec<_>>().join(",");

        let unique_writes = self.allocator.in_transaction(conn, &partition, &dates, |tx| {
            self.write_rows(tx, record_type, &unique, now)
        })?;

        let created = unique_writes.iter().filter(|w| w.outcome == WriteOutcome::Created).count();
        tracing::info!(
            record_type = %record_type,
            rows = rows.len(),
            created,
            updated = unique_writes.len() - created,
            "Ledger write committed"
        );

        let mut emitted = vec![false; unique_writes.len()];
        Ok(row_to_unique
            .into_iter()
            .map(|i| {
                let mut write = unique_writes[i].clone();
                if std::mem::replace(&mut emitted[i], true) {
                    write.outcome = WriteOutcome::Updated;
                }
                write
            })
            .collect())
    }

    fn find(
        &self,
        conn: &Connection,
        record_type: &str,
        natural_key: &str,
    ) -> Result<Option<LedgerRecord>, LedgerError> {
        find_record(conn, record_type, natural_key)
    }
}

// ═══════════════════════════════════════════════════════════
// Row access
// ═══════════════════════════════════════════════════════════

const RECORD_COLUMNS: &str = "id, record_type, partition_key, natural_key, ordinal, code,
     record_date, fields, created_at, updated_at";

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(LedgerRecord, String)> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok((
        LedgerRecord {
            id,
            record_type: row.get(1)?,
            partition_key: row.get(2)?,
            natural_key: row.get(3)?,
            ordinal: row.get(4)?,
            code: row.get(5)?,
            record_date: row.get(6)?,
            fields: BTreeMap::new(),
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        },
        row.get(7)?,
    ))
}

fn find_record(conn: &Connection, record_type: &str, natural_key: &str) -> Result<Option<LedgerRecord>, LedgerError> {
    let found = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM ledger_records WHERE record_type = ?1 AND natural_key = ?2"),
            params![record_type, natural_key],
            record_from_row,
        )
        .optional()?;

    match found {
        Some((mut record, fields_json)) => {
            record.fields = serde_json::from_str(&fields_json)?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn insert_record(conn: &Connection, record: &LedgerRecord) -> Result<(), LedgerError> {
    conn.execute(
        &format!("INSERT INTO ledger_records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            record.id.to_string(),
            record.record_type,
            record.partition_key,
            record.natural_key,
            record.ordinal,
            record.code,
            record.record_date,
            serde_json::to_string(&record.fields)?,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

fn update_fields(
    conn: &Connection,
    mut record: LedgerRecord,
    fields: &BTreeMap<String, FieldValue>,
    now: DateTime<Utc>,
) -> Result<LedgerRecord, LedgerError> {
    conn.execute(
        "UPDATE ledger_records SET fields = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(fields)?, now, record.id.to_string()],
    )?;
    record.fields = fields.clone();
    record.updated_at = now;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::ledger::existing_count;
    use crate::models::Amount;

    fn store() -> SqliteLedgerStore {
        SqliteLedgerStore::from_config(&LedgerConfig::default(), &AllocatorConfig::default())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fields(project: &str, approval: NaiveDate) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([
            ("project_name".to_string(), FieldValue::Text(project.into())),
            ("approval_date".to_string(), FieldValue::Date(approval)),
        ])
    }

    fn row(key: &str, d: NaiveDate) -> LedgerRecordInput {
        LedgerRecordInput {
            natural_key: key.into(),
            record_date: Some(d),
            fields: BTreeMap::from([("amount".to_string(), FieldValue::Amount(Amount::from_fen(100)))]),
        }
    }

    #[test]
    fn create_dates_record_from_fields_and_mints_code() {
        let conn = open_memory_database().unwrap();
        let write = store()
            .create_or_update(&conn, "procurement", &fields("道路工程", date(2024, 3, 5)), "C100")
            .unwrap();
        assert_eq!(write.outcome, WriteOutcome::Created);
        assert_eq!(write.record.code, "CG20240305-0001");
        assert_eq!(write.record.partition_key, "procurement/2024");
        assert_eq!(write.record.ordinal, 1);
    }

    #[test]
    fn same_natural_key_updates_in_place() {
        let conn = open_memory_database().unwrap();
        let s = store();
        let first = s
            .create_or_update(&conn, "procurement", &fields("道路工程", date(2024, 3, 5)), "C100")
            .unwrap();
        let second = s
            .create_or_update(&conn, "procurement", &fields("道路改造工程", date(2024, 6, 1)), "C100")
            .unwrap();

        assert_eq!(second.outcome, WriteOutcome::Updated);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.code, first.record.code);
        assert_eq!(second.record.fields["project_name"], FieldValue::Text("道路改造工程".into()));
        assert_eq!(existing_count(&conn, "procurement/2024").unwrap(), 1);

        let stored = s.find(&conn, "procurement", "C100").unwrap().unwrap();
        assert_eq!(stored.fields, second.record.fields);
    }

    #[test]
    fn batch_allocates_new_rows_in_input_order() {
        let conn = open_memory_database().unwrap();
        let s = store();
        let d = date(2024, 3, 5);
        let writes = s
            .create_or_update_batch(&conn, "payment", &[row("L1", d), row("L2", d), row("L3", d)])
            .unwrap();
        let codes: Vec<&str> = writes.iter().map(|w| w.record.code.as_str()).collect();
        assert_eq!(codes, ["CG20240305-0001", "CG20240305-0002", "CG20240305-0003"]);
    }

    #[test]
    fn reimporting_a_batch_allocates_nothing() {
        let conn = open_memory_database().unwrap();
        let s = store();
        let d = date(2024, 3, 5);
        let batch = [row("L1", d), row("L2", d)];
        let first = s.create_or_update_batch(&conn, "payment", &batch).unwrap();
        let again = s.create_or_update_batch(&conn, "payment", &batch).unwrap();

        assert!(again.iter().all(|w| w.outcome == WriteOutcome::Updated));
        let ordinals = |ws: &[LedgerWrite]| ws.iter().map(|w| w.record.ordinal).collect::<Vec<_>>();
        assert_eq!(ordinals(&first), ordinals(&again));
        assert_eq!(existing_count(&conn, "payment/2024").unwrap(), 2);
    }

    #[test]
    fn mixed_batch_updates_existing_and_appends_new() {
        let conn = open_memory_database().unwrap();
        let s = store();
        let d = date(2024, 3, 5);
        s.create_or_update_batch(&conn, "payment", &[row("L1", d)]).unwrap();

        let writes = s
            .create_or_update_batch(&conn, "payment", &[row("L9", d), row("L1", d), row("L8", d)])
            .unwrap();
        let summary: Vec<(WriteOutcome, i64)> = writes.iter().map(|w| (w.outcome, w.record.ordinal)).collect();
        assert_eq!(
            summary,
            vec![
                (WriteOutcome::Created, 2),
                (WriteOutcome::Updated, 1),
                (WriteOutcome::Created, 3),
            ]
        );
    }

    #[test]
    fn repeated_key_in_batch_updates_first_occurrence() {
        let conn = open_memory_database().unwrap();
        let s = store();
        let d = date(2024, 3, 5);
        let mut later = row("L1", date(2024, 9, 9));
        later.fields.insert("note".into(), FieldValue::Text("更正".into()));

        let writes = s
            .create_or_update_batch(&conn, "payment", &[row("L1", d), later])
            .unwrap();
        assert_eq!(writes[0].outcome, WriteOutcome::Created);
        assert_eq!(writes[1].outcome, WriteOutcome::Updated);
        assert_eq!(writes[0].record.id, writes[1].record.id);
        assert_eq!(writes[1].record.record_date, d);
        assert!(writes[1].record.fields.contains_key("note"));
        assert_eq!(existing_count(&conn, "payment/2024").unwrap(), 1);
    }

    #[test]
    fn rows_spanning_years_use_separate_partitions() {
        let conn = open_memory_database().unwrap();
        let writes = store()
            .create_or_update_batch(
                &conn,
                "payment",
                &[row("A", date(2023, 12, 30)), row("B", date(2024, 1, 2))],
            )
            .unwrap();
        assert_eq!(writes[0].record.partition_key, "payment/2023");
        assert_eq!(writes[1].record.partition_key, "payment/2024");
        assert_eq!(writes[0].record.ordinal, 1);
        assert_eq!(writes[1].record.ordinal, 1);
    }

    #[test]
    fn invalid_batch_persists_nothing() {
        let conn = open_memory_database().unwrap();
        let s = store();
        let d = date(2024, 3, 5);
        let err = s
            .create_or_update_batch(&conn, "payment", &[row("L1", d), row("  ", d)])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecord(_)));
        assert_eq!(existing_count(&conn, "payment/2024").unwrap(), 0);

        let writes = s.create_or_update_batch(&conn, "payment", &[row("L1", d)]).unwrap();
        assert_eq!(writes[0].record.ordinal, 1);
    }
}
