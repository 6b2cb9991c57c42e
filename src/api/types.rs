//! Shared types for the HTTP API layer.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::config::IntakeRuntime;
use crate::core_state::CoreState;
use crate::ledger::LedgerRecordInput;

// ═══════════════════════════════════════════════════════════
// API context
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }

    /// Run `op` on the blocking pool with a fresh connection and the
    /// runtime that is current when the request starts.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&CoreState, &IntakeRuntime, &Connection) -> Result<T, ApiError> + Send + 'static,
    {
        let core = self.core.clone();
        tokio::task::spawn_blocking(move || {
            let runtime = core.runtime();
            let conn = core.open_db()?;
            op(&core, &runtime, &conn)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Blocking task failed: {e}")))?
    }
}

// ═══════════════════════════════════════════════════════════
// Request / response bodies
// ═══════════════════════════════════════════════════════════

/// `POST /api/documents` body.
#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub filename: String,
    /// Base64 file content, optionally as a data URL.
    pub content: String,
    #[serde(default)]
    pub case_key: Option<String>,
}

/// `GET /api/drafts` query string.
#[derive(Debug, Default, Deserialize)]
pub struct DraftListQuery {
    pub state: Option<String>,
    pub prefix: Option<String>,
}

/// `POST /api/ledger/import` body.
#[derive(Debug, Deserialize)]
pub struct LedgerImportBody {
    pub rows: Vec<LedgerRecordInput>,
}

#[derive(Debug, Serialize)]
pub struct ConfigStatus {
    pub source: Option<String>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl ConfigStatus {
    pub fn of(core: &CoreState, runtime: &IntakeRuntime) -> Self {
        Self {
            source: core.config_source().map(|p| p.display().to_string()),
            loaded_at: runtime.loaded_at,
        }
    }
}
