//! Ledger collaborator: sequence allocation and committed records.

pub mod code;
pub mod sequence;
pub mod store;

pub use code::*;
pub use sequence::*;
pub use store::*;

use chrono::NaiveDate;
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Another writer took the ordinal or moved the partition count first.
    /// Transient: retried with a fresh count.
    #[error("Ordinal collision in partition {partition}")]
    AllocationCollision { partition: String },

    #[error(
        "Allocation in partition {partition} failed after {attempts} attempts (dates: {})",
        dates.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
    )]
    RetriesExhausted {
        partition: String,
        dates: Vec<NaiveDate>,
        attempts: u32,
    },

    #[error("Invalid ledger record: {0}")]
    InvalidRecord(String),

    #[error("Ledger storage error: {0}")]
    Database(#[from] DatabaseError),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AllocationCollision { .. } => true,
            Self::Database(e) => e.is_contention(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Database(DatabaseError::Json(e))
    }
}
