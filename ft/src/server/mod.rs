//! HTTP API
//!
//! Thin axum layer over [`IngestService`]. Handlers resolve the caller's
//! family, call the service, and map [`Error`] onto status codes.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use eyre::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::ingest::IngestService;

pub mod handlers;

pub use handlers::{FAMILY_HEADER, USER_HEADER};

/// Shared handler state
pub struct AppState {
    pub service: IngestService,
}

impl AppState {
    pub fn new(service: IngestService) -> Self {
        Self { service }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ExtractionService { .. } | Error::ExtractionValidation(_) | Error::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/search", post(handlers::search))
        .route("/api/tasks", get(handlers::list_tasks).post(handlers::create_task))
        .route("/api/tasks/stream", get(handlers::stream_tasks))
        .route("/api/tasks/{id}", delete(handlers::delete_task))
        .route("/api/tasks/{id}/complete", post(handlers::complete_task))
        .with_state(state)
}

/// Serve the API until Ctrl+C or SIGTERM
pub async fn serve(bind: &str, state: Arc<AppState>) -> Result<()> {
    debug!(%bind, "serve: called");
    let listener = TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::DateResolver;
    use crate::extract::Extractor;
    use crate::llm::client::mock::{MockLlmClient, MockReply};
    use crate::prompts::PromptLoader;
    use crate::state::TaskStore;
    use crate::state::fake::FakeTaskStore;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        llm: Arc<MockLlmClient>,
        store: Arc<FakeTaskStore>,
    }

    fn harness_with(replies: Vec<MockReply>, store: FakeTaskStore) -> Harness {
        let llm = Arc::new(MockLlmClient::new(replies));
        let store = Arc::new(store);
        let extractor = Extractor::new(llm.clone(), PromptLoader::embedded_only());
        let service = IngestService::new(extractor, DateResolver::default(), store.clone());
        Harness {
            app: router(Arc::new(AppState::new(service))),
            llm,
            store,
        }
    }

    fn harness(replies: Vec<MockReply>) -> Harness {
        harness_with(replies, FakeTaskStore::new())
    }

    fn post_json(uri: &str, family: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(family) = family {
            builder = builder.header(FAMILY_HEADER, family);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, family: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(FAMILY_HEADER, family)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(vec![]);
        let response = h
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_search_creates_task() {
        let h = harness(vec![MockReply::content(
            r#"{"title":"Buy milk","participants":[],"due_date_text":null}"#,
        )]);

        let (status, body) = send(&h.app, post_json("/api/search", Some("smiths"), r#"{"text":"buy milk"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        let id = body["id"].as_str().unwrap();
        assert!(!id.is_empty());
        assert_eq!(body["data"]["id"], id);
        assert_eq!(body["data"]["title"], "Buy milk");
        assert_eq!(body["data"]["source"], "ai");
        assert_eq!(body["data"]["group_key"], "smiths");
        assert!(body["data"]["due_iso"].is_null());
        assert_eq!(h.store.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_search_family_from_body() {
        let h = harness(vec![MockReply::content(
            r#"{"title":"Water plants","participants":[],"due_date_text":null}"#,
        )]);

        let (status, body) = send(
            &h.app,
            post_json("/api/search", None, r#"{"text":"water plants","family":"joneses"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["group_key"], "joneses");
    }

    #[tokio::test]
    async fn test_search_rejects_missing_text() {
        let h = harness(vec![]);

        for payload in [r#"{}"#, r#"{"text":""}"#, r#"{"text":"   "}"#, r#"{"text":42}"#, "not json"] {
            let (status, body) = send(&h.app, post_json("/api/search", Some("smiths"), payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
            assert!(body["error"].is_string());
        }
        assert_eq!(h.llm.call_count(), 0);
        assert_eq!(h.store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_search_without_family_is_bad_request() {
        let h = harness(vec![]);

        let (status, _) = send(&h.app, post_json("/api/search", None, r#"{"text":"buy milk"}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_provider_failure_is_server_error() {
        let h = harness(vec![MockReply::ApiError {
            status: 503,
            message: "over capacity".to_string(),
        }]);

        let (status, body) = send(&h.app, post_json("/api/search", Some("smiths"), r#"{"text":"buy milk"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("503"));
        assert_eq!(h.store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_search_invalid_model_output_is_server_error() {
        let h = harness(vec![MockReply::content(r#"{"participants":[]}"#)]);

        let (status, _) = send(&h.app, post_json("/api/search", Some("smiths"), r#"{"text":"something"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_search_storage_failure_is_server_error() {
        let h = harness_with(
            vec![MockReply::content(
                r#"{"title":"Buy milk","participants":[],"due_date_text":null}"#,
            )],
            FakeTaskStore::failing(),
        );

        let (status, body) = send(&h.app, post_json("/api/search", Some("smiths"), r#"{"text":"buy milk"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("storage"));
    }

    #[tokio::test]
    async fn test_manual_task_list_and_complete() {
        let h = harness(vec![]);

        let (status, created) = send(
            &h.app,
            post_json(
                "/api/tasks",
                Some("smiths"),
                r#"{"title":"Take out bins","participants":"Sam, Alex","due":"2024-05-20T08:00:00Z"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["data"]["source"], "manual");
        assert_eq!(created["data"]["participants"], json!(["Sam", "Alex"]));
        assert_eq!(created["data"]["due_iso"], "2024-05-20T08:00:00.000Z");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, listed) = send(&h.app, get("/api/tasks", "smiths")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);

        let (status, other) = send(&h.app, get("/api/tasks", "joneses")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(other["tasks"].as_array().unwrap().is_empty());

        let uri = format!("/api/tasks/{}/complete", id);
        let (status, done) = send(&h.app, post_json(&uri, Some("smiths"), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["id"], id.as_str());
        assert_eq!(h.store.len(), 0);
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_task_requires_title() {
        let h = harness(vec![]);

        let (status, _) = send(&h.app, post_json("/api/tasks", Some("smiths"), r#"{"title":"  "}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_task_is_not_found() {
        let h = harness(vec![]);

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/tasks/nope")
            .header(FAMILY_HEADER, "smiths")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_delete_task() {
        let h = harness(vec![]);
        let (_, created) = send(&h.app, post_json("/api/tasks", Some("smiths"), r#"{"title":"Fix tap"}"#)).await;
        let id = created["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/api/tasks/{}", id))
            .header(FAMILY_HEADER, "smiths")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert!(h.store.get_task(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_sends_initial_snapshot() {
        let h = harness(vec![]);
        send(&h.app, post_json("/api/tasks", Some("smiths"), r#"{"title":"Fix tap"}"#)).await;

        let response = h.app.clone().oneshot(get("/api/tasks/stream", "smiths")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let chunk = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(chunk.contains("event: snapshot"));
        assert!(chunk.contains("Fix tap"));
    }
}
