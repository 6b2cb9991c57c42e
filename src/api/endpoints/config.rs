//! Configuration endpoints.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ConfigStatus};
use crate::config::IntakeConfig;

/// `GET /api/config` returns the active configuration.
pub async fn current(State(ctx): State<ApiContext>) -> Json<IntakeConfig> {
    Json(ctx.core.runtime().config.clone())
}

/// `POST /api/config/reload` re-reads the config file. In-flight requests
/// finish on the runtime they started with.
pub async fn reload(State(ctx): State<ApiContext>) -> Result<Json<ConfigStatus>, ApiError> {
    let runtime = ctx.core.reload_config()?;
    tracing::info!(loaded_at = %runtime.loaded_at, "Configuration reloaded");
    Ok(Json(ConfigStatus::of(&ctx.core, &runtime)))
}
