//! Draft session store: staged drafts keyed by case, with lazy expiry.

pub mod clock;
pub mod store;

pub use clock::*;
pub use store::*;

use chrono::Duration;
use thiserror::Error;

use crate::config::DraftConfig;
use crate::models::enums::DraftState;
use crate::models::CaseKey;

/// The two draft lifetimes, read from the runtime at access time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftTtls {
    /// Inactivity limit while Open or ReadyForReview.
    pub session: Duration,
    /// Absolute limit for any non-terminal state.
    pub draft: Duration,
}

impl From<&DraftConfig> for DraftTtls {
    fn from(config: &DraftConfig) -> Self {
        Self {
            session: config.session_ttl(),
            draft: config.draft_ttl(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("No draft for case {0}")]
    NotFound(CaseKey),

    #[error("Draft for case {0} expired; restart the case")]
    Expired(CaseKey),

    #[error("Draft for case {case_key} cannot go from {from} to {to}")]
    InvalidTransition {
        case_key: CaseKey,
        from: DraftState,
        to: DraftState,
    },

    #[error("Draft for case {case_key} cannot be committed; unresolved: {}", fields.join(", "))]
    CommitBlocked { case_key: CaseKey, fields: Vec<String> },

    #[error("Draft for case {0} is under review and does not accept documents")]
    UnderReview(CaseKey),

    #[error("Draft for case {case_key} has no field {field}")]
    UnknownField { case_key: CaseKey, field: String },
}
