//! Ledger endpoints: spreadsheet bulk import and record lookup.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, LedgerImportBody};
use crate::ledger::{LedgerRecord, LedgerWrite};

/// `POST /api/ledger/import`
pub async fn import(
    State(ctx): State<ApiContext>,
    Json(body): Json<LedgerImportBody>,
) -> Result<Json<Vec<LedgerWrite>>, ApiError> {
    if body.rows.is_empty() {
        return Err(ApiError::BadRequest("No rows to import".into()));
    }
    let writes = ctx
        .blocking(move |core, runtime, conn| Ok(core.intake().import_ledger_rows(runtime, conn, &body.rows)?))
        .await?;
    tracing::info!(rows = writes.len(), "Ledger import written");
    Ok(Json(writes))
}

/// `GET /api/ledger/:natural_key`
pub async fn record(
    State(ctx): State<ApiContext>,
    Path(natural_key): Path<String>,
) -> Result<Json<LedgerRecord>, ApiError> {
    let lookup = natural_key.clone();
    let found = ctx
        .blocking(move |core, runtime, conn| Ok(core.intake().find_ledger_record(runtime, conn, &lookup)?))
        .await?;
    found
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No ledger record for {natural_key}")))
}
