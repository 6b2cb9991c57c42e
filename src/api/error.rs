//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreError;
use crate::drafts::DraftError;
use crate::ledger::LedgerError;
use crate::pipeline::processor::IntakeError;

/// Seconds a client should wait before retrying an exhausted allocation.
const ALLOCATION_RETRY_AFTER_SECS: u64 = 1;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("{message}")]
    Unprocessable {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("Gone: {0}")]
    Gone(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Temporarily unavailable: {message}")]
    Unavailable { message: String, retry_after: u64 },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail, None),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail, None),
            ApiError::Unprocessable { code, message, details } => {
                (StatusCode::UNPROCESSABLE_ENTITY, code, message, details)
            }
            ApiError::Conflict { code, message, details } => {
                (StatusCode::CONFLICT, code, message, details)
            }
            ApiError::Gone(detail) => (StatusCode::GONE, "DRAFT_EXPIRED", detail, None),
            ApiError::PayloadTooLarge(detail) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", detail, None)
            }
            ApiError::Unavailable { message, retry_after } => {
                let mut response = json_error(StatusCode::SERVICE_UNAVAILABLE, "RETRY_LATER", message, None);
                if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert("Retry-After", val);
                }
                return response;
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };
        json_error(status, code, message, details)
    }
}

fn json_error(
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
) -> Response {
    let body = ErrorBody {
        error: ErrorDetail { code, message, details },
    };
    (status, Json(body)).into_response()
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Database(e) => ApiError::Internal(e.to_string()),
            CoreError::Config(e) => ApiError::Unprocessable {
                code: "CONFIG_REJECTED",
                message: e.to_string(),
                details: None,
            },
        }
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DraftError> for ApiError {
    fn from(err: DraftError) -> Self {
        let message = err.to_string();
        match err {
            DraftError::NotFound(_) => ApiError::NotFound(message),
            DraftError::Expired(_) => ApiError::Gone(message),
            DraftError::InvalidTransition { from, to, .. } => ApiError::Conflict {
                code: "INVALID_TRANSITION",
                message,
                details: Some(serde_json::json!({ "from": from, "to": to })),
            },
            DraftError::CommitBlocked { fields, .. } => ApiError::Conflict {
                code: "COMMIT_BLOCKED",
                message,
                details: Some(serde_json::json!({ "fields": fields })),
            },
            DraftError::UnderReview(_) => ApiError::Conflict {
                code: "UNDER_REVIEW",
                message,
                details: None,
            },
            DraftError::UnknownField { .. } => ApiError::BadRequest(message),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RetriesExhausted { .. } | LedgerError::AllocationCollision { .. } => {
                ApiError::Unavailable {
                    message: err.to_string(),
                    retry_after: ALLOCATION_RETRY_AFTER_SECS,
                }
            }
            LedgerError::InvalidRecord(detail) => ApiError::BadRequest(detail),
            LedgerError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Rejected(rejected) => ApiError::Unprocessable {
                code: "CLASSIFICATION_REJECTED",
                message: rejected.to_string(),
                details: serde_json::to_value(&rejected).ok(),
            },
            e @ IntakeError::TooLarge { .. } => ApiError::PayloadTooLarge(e.to_string()),
            e @ IntakeError::CaseKeyUnresolved { .. } => ApiError::Unprocessable {
                code: "CASE_KEY_UNRESOLVED",
                message: e.to_string(),
                details: None,
            },
            IntakeError::Draft(e) => e.into(),
            IntakeError::Ledger(e) => e.into(),
            IntakeError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CaseKey;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn key() -> CaseKey {
        CaseKey::new("C100").unwrap()
    }

    #[tokio::test]
    async fn not_found_returns_404() {
        let response = ApiError::from(DraftError::NotFound(key())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn expired_draft_returns_410() {
        let response = ApiError::from(DraftError::Expired(key())).into_response();
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(body_json(response).await["error"]["code"], "DRAFT_EXPIRED");
    }

    #[tokio::test]
    async fn commit_blocked_lists_fields() {
        let err = DraftError::CommitBlocked {
            case_key: key(),
            fields: vec!["project_name".into()],
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "COMMIT_BLOCKED");
        assert_eq!(json["error"]["details"]["fields"][0], "project_name");
    }

    #[tokio::test]
    async fn exhausted_allocation_returns_503_with_retry_after() {
        let err = LedgerError::RetriesExhausted {
            partition: "procurement/2024".into(),
            dates: vec![],
            attempts: 5,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "1");
        assert_eq!(body_json(response).await["error"]["code"], "RETRY_LATER");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("something broke".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
        assert!(json["error"].get("details").is_none());
    }
}
