//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ConfigStatus};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub config: ConfigStatus,
    pub pending_exports: usize,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let runtime = ctx.core.runtime();
    Ok(Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        config: ConfigStatus::of(&ctx.core, &runtime),
        pending_exports: ctx.core.intake().drafts().pending_exports(),
    }))
}
