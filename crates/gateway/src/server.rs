//! HTTP server assembly
//!
//! Routes, shared state, CORS and request tracing for the web tier.

use crate::handlers;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use relay_common::error::Result;
use relay_common::metrics::metrics_router;
use relay_common::{Backend, RelayConfig};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(backend: Backend, config: Arc<RelayConfig>) -> Self {
        Self { backend, config }
    }
}

/// CORS layer for the configured origins, if any
pub fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}

/// Build the gateway router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);

    let router = Router::new()
        .route("/", get(handlers::index))
        .route("/ask", post(handlers::ask))
        .route("/result/:task_id", get(handlers::result))
        .route("/health", get(handlers::health))
        .merge(metrics_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Serve the gateway until `shutdown` resolves
pub async fn serve<F>(state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.listen_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use relay_common::config::BackendKind;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(report_unknown_jobs: bool) -> AppState {
        let mut config = RelayConfig::default();
        config.backend.kind = BackendKind::Memory;
        config.gateway.embedded_workers = 1;
        config.gateway.report_unknown_jobs = report_unknown_jobs;
        config.gateway.max_prompt_chars = 16;
        AppState::new(Backend::in_memory(), Arc::new(config))
    }

    fn ask(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ask")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_index_serves_page() {
        let response = build_router(state(false)).oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("<form"));
    }

    #[tokio::test]
    async fn test_ask_accepts_prompt() {
        let state = state(false);
        let app = build_router(state.clone());

        let response = app.oneshot(ask("prompt=Hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        let task_id = body["task_id"].as_str().unwrap();
        assert!(!task_id.is_empty());
        assert_eq!(state.backend.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ask_rejects_missing_prompt() {
        let state = state(false);

        for request in [ask("prompt="), ask("other=1"), ask("")] {
            let response = build_router(state.clone()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await, json!({"message": "Prompt is required"}));
        }

        // not a form at all
        let request = Request::builder()
            .method("POST")
            .uri("/ask")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(state.backend.queue().len().await.unwrap(), 0);
    }

    fn ask_multipart(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ask")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
            .body(Body::from(body.replace('\n', "\r\n")))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ask_accepts_multipart_prompt() {
        let state = state(false);
        let body = "--XyZ\n\
                    Content-Disposition: form-data; name=\"other\"\n\n\
                    ignored\n\
                    --XyZ\n\
                    Content-Disposition: form-data; name=\"prompt\"\n\n\
                    Hello\n\
                    --XyZ--\n";

        let response = build_router(state.clone())
            .oneshot(ask_multipart(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let task_id = body_json(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();
        let record = state.backend.status(&task_id).await.unwrap().unwrap();
        assert_eq!(record.prompt, "Hello");
    }

    #[tokio::test]
    async fn test_ask_rejects_multipart_without_prompt() {
        let state = state(false);
        let body = "--XyZ\n\
                    Content-Disposition: form-data; name=\"prompt\"\n\n\
                    \n\
                    --XyZ--\n";

        let response = build_router(state.clone())
            .oneshot(ask_multipart(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"message": "Prompt is required"}));

        let response = build_router(state.clone())
            .oneshot(ask_multipart("not multipart at all"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.backend.queue().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ask_rejects_long_prompt() {
        let state = state(false);
        let response = build_router(state.clone())
            .oneshot(ask(&format!("prompt={}", "a".repeat(17))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"message": "Prompt is too long"}));
        assert_eq!(state.backend.queue().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_reports_pending() {
        let response = build_router(state(false))
            .oneshot(get("/result/does-not-exist"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"state": "PENDING", "status": "Task is currently running."})
        );
    }

    #[tokio::test]
    async fn test_unknown_id_not_found_when_strict() {
        let response = build_router(state(true))
            .oneshot(get("/result/does-not-exist"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["state"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = build_router(state(false));

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("relay_jobs_submitted_total"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let mut config = RelayConfig::default();
        config.gateway.allowed_origins = vec!["http://localhost:5000".to_string()];
        let app = build_router(AppState::new(Backend::in_memory(), Arc::new(config)));

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/ask")
            .header(header::ORIGIN, "http://localhost:5000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn test_cors_disabled_without_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["http://localhost:5000".to_string()]).is_some());
    }
}
