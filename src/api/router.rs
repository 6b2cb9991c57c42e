//! API router.
//!
//! Returns a composable `Router` with every route nested under `/api/`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;
use crate::pipeline::import::MAX_UPLOAD_BYTES;

/// Largest accepted request body: a maximum-size upload as base64 plus
/// room for the JSON envelope.
const MAX_BODY_BYTES: usize = MAX_UPLOAD_BYTES / 3 * 4 + 64 * 1024;

pub fn intake_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/documents", post(endpoints::documents::upload))
        .route("/drafts", get(endpoints::drafts::list))
        .route(
            "/drafts/:case_key",
            get(endpoints::drafts::detail).put(endpoints::drafts::submit_review),
        )
        .route("/drafts/:case_key/open", post(endpoints::drafts::open_review))
        .route("/ledger/import", post(endpoints::ledger::import))
        .route("/ledger/:natural_key", get(endpoints::ledger::record))
        .route("/config", get(endpoints::config::current))
        .route("/config/reload", post(endpoints::config::reload))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::access::log_access))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::ConfigHandle;
    use crate::drafts::ManualClock;

    struct TestApp {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        router: Router,
    }

    fn app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let core = CoreState::with_clock(
            ConfigHandle::load(None).unwrap(),
            dir.path().join("intake.db"),
            clock.clone(),
        );
        TestApp {
            router: intake_router(Arc::new(core)),
            clock,
            _dir: dir,
        }
    }

    impl TestApp {
        async fn send(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(json) => builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        async fn upload(&self, filename: &str, text: &str) -> (StatusCode, serde_json::Value) {
            self.clock.advance(chrono::Duration::minutes(1));
            let content = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
            self.send(
                "POST",
                "/api/documents",
                Some(serde_json::json!({ "filename": filename, "content": content })),
            )
            .await
        }
    }

    const CONTROL_PRICE: &str = "控制价审批表\n项目名称：某某道路改造工程\n控制价：123.45万元\n审批日期：2024年3月5日";
    const ANNOUNCEMENT: &str = "采购公告\n项目名称：某某道路改造工程\n公告日期：2024-03-20";

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app();
        let (status, json) = app.send("GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["pending_exports"], 0);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (status, _) = app().send("GET", "/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_review_and_commit() {
        let app = app();
        let (status, json) = app.upload("C100_2-24.pdf", CONTROL_PRICE).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["case_key"], "C100");
        assert_eq!(json["document_type"], "control_price_approval");

        let (_, json) = app.upload("C100_2-47.pdf", ANNOUNCEMENT).await;
        assert_eq!(json["draft"]["state"], "ready_for_review");

        let (status, list) = app.send("GET", "/api/drafts?state=ready_for_review", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, draft) = app.send("POST", "/api/drafts/c100/open", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(draft["state"], "under_review");

        let (status, outcome) = app
            .send("PUT", "/api/drafts/C100", Some(serde_json::json!({ "transition": "commit" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["status"], "committed");
        assert_eq!(outcome["record"]["record"]["code"], "CG20240305-0001");

        let (status, record) = app.send("GET", "/api/ledger/C100", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["ordinal"], 1);

        let (status, _) = app.send("GET", "/api/drafts/C100", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejected_filename_reports_tokens() {
        let app = app();
        let (status, json) = app.upload("C100_9-99.pdf", CONTROL_PRICE).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["code"], "CLASSIFICATION_REJECTED");
        assert!(json["error"]["details"]["allowed"].as_array().unwrap().len() >= 6);
    }

    #[tokio::test]
    async fn incomplete_draft_cannot_be_opened_or_committed() {
        let app = app();
        app.upload("C100_2-24.pdf", "项目名称：某某道路改造工程").await;
        let (status, json) = app.send("POST", "/api/drafts/C100/open", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "INVALID_TRANSITION");

        let (status, json) = app
            .send("PUT", "/api/drafts/C100", Some(serde_json::json!({ "transition": "commit" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "INVALID_TRANSITION");

        // the missing document can still be added
        let (status, json) = app.upload("C100_2-24_v2.pdf", CONTROL_PRICE).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["draft"]["state"], "ready_for_review");
    }

    #[tokio::test]
    async fn commit_with_conflict_is_blocked() {
        let app = app();
        app.upload("C100_2-24.pdf", CONTROL_PRICE).await;
        app.upload("C100_2-47.pdf", &ANNOUNCEMENT.replace("某某道路改造工程", "某某桥梁维修工程")).await;
        let (status, _) = app.send("POST", "/api/drafts/C100/open", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) = app
            .send("PUT", "/api/drafts/C100", Some(serde_json::json!({ "transition": "commit" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "COMMIT_BLOCKED");
        assert_eq!(json["error"]["details"]["fields"][0], "project_name");
    }

    #[tokio::test]
    async fn expired_draft_is_gone() {
        let app = app();
        app.upload("C100_2-24.pdf", CONTROL_PRICE).await;
        app.clock.advance(chrono::Duration::hours(25));
        let (status, json) = app.send("GET", "/api/drafts/C100", None).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(json["error"]["code"], "DRAFT_EXPIRED");
    }

    #[tokio::test]
    async fn bad_state_filter_is_400() {
        let (status, _) = app().send("GET", "/api/drafts?state=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ledger_import_allocates_in_row_order() {
        let app = app();
        let rows = serde_json::json!({
            "rows": [
                { "natural_key": "L1", "record_date": "2024-03-05", "fields": {} },
                { "natural_key": "L2", "record_date": "2024-03-05", "fields": {} }
            ]
        });
        let (status, json) = app.send("POST", "/api/ledger/import", Some(rows)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["record"]["ordinal"], 1);
        assert_eq!(json[1]["record"]["ordinal"], 2);
        assert_eq!(json[1]["outcome"], "created");
    }

    #[tokio::test]
    async fn config_reload_without_file_uses_defaults() {
        let app = app();
        let (status, json) = app.send("POST", "/api/config/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["source"].is_null());
        let (_, config) = app.send("GET", "/api/config", None).await;
        assert_eq!(config["ledger"]["code_prefix"], "CG");
    }
}
