//! Per-partition ordinal allocation.
//!
//! Each partition keeps the count of records already persisted. A batch of
//! `k` new records receives `count+1 ..= count+k` in input order; the
//! registry rows and the count bump are written in the caller's
//! transaction, the bump as a compare-and-swap on the count that was read.
//! A concurrent writer therefore either waits on the immediate
//! transaction lock or trips a primary-key / CAS failure, which is retried
//! from a fresh count and never resolved by reusing an ordinal.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::LedgerError;
use crate::config::AllocatorConfig;
use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy)]
pub struct SequenceAllocator {
    max_attempts: u32,
}

impl SequenceAllocator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self::new(config.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Allocate one ordinal for a record dated `date`.
    pub fn allocate(&self, conn: &Connection, partition: &str, date: NaiveDate) -> Result<i64, LedgerError> {
        self.allocate_batch(conn, partition, &[date])?
            .pop()
            .ok_or_else(|| LedgerError::InvalidRecord("allocation returned no ordinal".into()))
    }

    /// Allocate consecutive ordinals for `dates`, in the given order.
    pub fn allocate_batch(
        &self,
        conn: &Connection,
        partition: &str,
        dates: &[NaiveDate],
    ) -> Result<Vec<i64>, LedgerError> {
        if dates.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<(NaiveDate, Option<&str>)> = dates.iter().map(|d| (*d, None)).collect();
        let ordinals = self.in_transaction(conn, partition, dates, |tx| {
            append(tx, partition, &entries, Utc::now())
        })?;
        tracing::info!(
            partition = %partition,
            count = ordinals.len(),
            first = ordinals.first().copied().unwrap_or_default(),
            "Ordinals allocated"
        );
        Ok(ordinals)
    }

    /// Run `op` in an immediate transaction, retrying contention with a
    /// fresh transaction up to the configured attempt count.
    pub fn in_transaction<T, F>(
        &self,
        conn: &Connection,
        partition: &str,
        dates: &[NaiveDate],
        mut op: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, LedgerError>,
    {
        for attempt in 1..=self.max_attempts {
            let result = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                .map_err(LedgerError::from)
                .and_then(|tx| {
                    let value = op(&tx)?;
                    tx.commit()?;
                    Ok(value)
                });

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(partition = %partition, attempt, error = %e, "Allocation collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            partition = %partition,
            attempts = self.max_attempts,
            "Allocation retries exhausted"
        );
        Err(LedgerError::RetriesExhausted {
            partition: partition.to_string(),
            dates: dates.to_vec(),
            attempts: self.max_attempts,
        })
    }
}

/// Persisted record count of `partition`, zero for a new partition.
pub fn existing_count(conn: &Connection, partition: &str) -> Result<i64, LedgerError> {
    let count = conn
        .query_row(
            "SELECT existing_count FROM sequence_partitions WHERE partition_key = ?1",
            [partition],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

/// Append registry rows for `entries` and bump the partition count.
/// Must run inside a transaction that also holds the record inserts.
pub fn append(
    conn: &Connection,
    partition: &str,
    entries: &[(NaiveDate, Option<&str>)],
    now: DateTime<Utc>,
) -> Result<Vec<i64>, LedgerError> {
    let before = existing_count(conn, partition)?;
    conn.execute(
        "INSERT OR IGNORE INTO sequence_partitions (partition_key, existing_count) VALUES (?1, 0)",
        [partition],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO sequence_registry (partition_key, ordinal, record_date, natural_key, allocated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut ordinals = Vec::with_capacity(entries.len());
    for (offset, (date, natural_key)) in entries.iter().enumerate() {
        let ordinal = before + offset as i64 + 1;
        stmt.execute(params![partition, ordinal, date, natural_key, now])
            .map_err(|e| collision_or_storage(e, partition))?;
        ordinals.push(ordinal);
    }

    let after = before + entries.len() as i64;
    let changed = conn.execute(
        "UPDATE sequence_partitions SET existing_count = ?1
         WHERE partition_key = ?2 AND existing_count = ?3",
        params![after, partition, before],
    )?;
    if changed != 1 {
        return Err(LedgerError::AllocationCollision {
            partition: partition.to_string(),
        });
    }
    Ok(ordinals)
}

fn collision_or_storage(e: rusqlite::Error, partition: &str) -> LedgerError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => LedgerError::AllocationCollision {
            partition: partition.to_string(),
        },
        _ => LedgerError::Database(DatabaseError::Sqlite(e)),
    }
}
