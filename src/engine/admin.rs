//! Loopback admin API served by the engine.
//!
//! | Route          | Effect                                              |
//! |----------------|-----------------------------------------------------|
//! | `POST /load`   | load the body as the engine document                |
//! | `POST /stop`   | graceful stop of every listener                     |
//! | `GET /config`  | the active document                                 |

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::engine::{EngineError, ProxyEngine};

pub fn setup_admin_router(engine: ProxyEngine) -> Router {
    Router::new()
        .route("/load", post(load))
        .route("/stop", post(stop))
        .route("/config", get(config))
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

async fn load(State(engine): State<ProxyEngine>, headers: HeaderMap, body: Bytes) -> Response {
    let force_reload = must_revalidate(&headers);

    match engine.load(&body, force_reload).await {
        Ok(outcome) => {
            tracing::info!(outcome = %outcome, force_reload, "Document loaded via admin API");
            Json(json!({ "status": outcome.as_str() })).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Rejected document");
            let status = match e {
                EngineError::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                EngineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn stop(State(engine): State<ProxyEngine>) -> Json<serde_json::Value> {
    engine.stop();
    Json(json!({ "status": "stopping" }))
}

async fn config(State(engine): State<ProxyEngine>) -> Response {
    match engine.document().await {
        Some(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no document loaded" }))).into_response(),
    }
}

/// `Cache-Control: must-revalidate` forces a reload of an identical document.
fn must_revalidate(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("must-revalidate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::document;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn send(engine: &ProxyEngine, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = setup_admin_router(engine.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_load(body: Vec<u8>, force: bool) -> Request<Body> {
        let mut builder = Request::post("/load").header(header::CONTENT_TYPE, "application/json");
        if force {
            builder = builder.header(header::CACHE_CONTROL, "no-cache, must-revalidate");
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_load_config_and_stop() {
        let engine = ProxyEngine::new();
        let doc = document(&["127.0.0.1:0"], &[("api.local", ":4000")]);

        let (status, body) = send(&engine, Request::get("/config").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, body) = send(&engine, post_load(doc.clone(), false)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");

        let (_, body) = send(&engine, post_load(doc.clone(), false)).await;
        assert_eq!(body["status"], "unchanged");
        let (_, body) = send(&engine, post_load(doc.clone(), true)).await;
        assert_eq!(body["status"], "reloaded");

        let (status, body) = send(&engine, Request::get("/config").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["http"]["routes"][0]["host"], "api.local");

        let (status, body) = send(&engine, Request::post("/stop").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopping");
        tokio::time::timeout(Duration::from_secs(5), engine.wait()).await.unwrap();

        let (status, _) = send(&engine, post_load(doc, false)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_document_is_400() {
        let engine = ProxyEngine::new();
        let (status, body) = send(&engine, post_load(b"{}".to_vec(), false)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid engine document"));
        assert!(engine.document().await.is_none());
    }

    #[test]
    fn test_must_revalidate() {
        let mut headers = HeaderMap::new();
        assert!(!must_revalidate(&headers));
        headers.insert(header::CACHE_CONTROL, "max-age=0, Must-Revalidate".parse().unwrap());
        assert!(must_revalidate(&headers));
    }
}
