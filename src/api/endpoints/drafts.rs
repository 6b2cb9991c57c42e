//! Draft listing and review endpoints.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, DraftListQuery};
use crate::drafts::DraftFilter;
use crate::models::enums::DraftState;
use crate::models::{CaseKey, Draft, DraftSummary};
use crate::pipeline::processor::{ReviewOutcome, ReviewSubmission};

fn parse_key(raw: &str) -> Result<CaseKey, ApiError> {
    CaseKey::new(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid case key: {raw:?}")))
}

/// `GET /api/drafts?state=&prefix=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<DraftListQuery>,
) -> Result<Json<Vec<DraftSummary>>, ApiError> {
    let state = query
        .state
        .as_deref()
        .map(DraftState::from_str)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let filter = DraftFilter {
        state,
        prefix: query.prefix,
    };
    let rows = ctx
        .blocking(move |core, runtime, conn| Ok(core.intake().list_drafts(runtime, conn, &filter)))
        .await?;
    Ok(Json(rows))
}

/// `GET /api/drafts/:case_key`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(case_key): Path<String>,
) -> Result<Json<Draft>, ApiError> {
    let key = parse_key(&case_key)?;
    let draft = ctx
        .blocking(move |core, runtime, conn| Ok(core.intake().get_draft(runtime, conn, &key)?))
        .await?;
    Ok(Json(draft))
}

/// `POST /api/drafts/:case_key/open` opens the review.
pub async fn open_review(
    State(ctx): State<ApiContext>,
    Path(case_key): Path<String>,
) -> Result<Json<Draft>, ApiError> {
    let key = parse_key(&case_key)?;
    let draft = ctx
        .blocking(move |core, runtime, conn| Ok(core.intake().open_review(runtime, conn, &key)?))
        .await?;
    Ok(Json(draft))
}

/// `PUT /api/drafts/:case_key` writes resolutions back and
/// optionally commits or discards.
pub async fn submit_review(
    State(ctx): State<ApiContext>,
    Path(case_key): Path<String>,
    Json(submission): Json<ReviewSubmission>,
) -> Result<Json<ReviewOutcome>, ApiError> {
    let key = parse_key(&case_key)?;
    let outcome = ctx
        .blocking(move |core, runtime, conn| {
            Ok(core.intake().submit_review(runtime, conn, &key, &submission)?)
        })
        .await?;
    Ok(Json(outcome))
}
