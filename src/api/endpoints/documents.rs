//! Document upload endpoint.
//!
//! `POST /api/documents` receives one file as base64, classifies it by
//! filename, extracts its fields and merges it into the case draft.

use axum::extract::State;
use axum::Json;
use base64::Engine;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, UploadBody};
use crate::pipeline::processor::{UploadOutcome, UploadRequest};

/// `POST /api/documents`
pub async fn upload(
    State(ctx): State<ApiContext>,
    Json(payload): Json<UploadBody>,
) -> Result<Json<UploadOutcome>, ApiError> {
    if payload.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename is required".into()));
    }
    let bytes = decode_data_url(&payload.content)
        .map_err(|e| ApiError::BadRequest(format!("Invalid file content: {e}")))?;

    let request = UploadRequest {
        filename: payload.filename,
        bytes,
        case_key: payload.case_key,
    };
    let outcome = ctx
        .blocking(move |core, runtime, conn| Ok(core.intake().upload(runtime, conn, request)?))
        .await?;
    Ok(Json(outcome))
}

/// Decode a base64 data URL to raw bytes.
///
/// Handles both `data:application/pdf;base64,...` and raw base64 strings.
fn decode_data_url(data_url: &str) -> Result<Vec<u8>, String> {
    let base64_data = match data_url.find(',') {
        Some(idx) => &data_url[idx + 1..],
        None => data_url,
    };

    base64::engine::general_purpose::STANDARD
        .decode(base64_data.trim())
        .map_err(|e| format!("Base64 decode failed: {e}"))
}
