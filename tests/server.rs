use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use quiz_chain::debug::{DebugSink, DiagnosticRecord};
use quiz_chain::server::{router, AppState, TEST_NO_BROWSER};
use quiz_chain::{PageSnapshot, SolverConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct NullSink;

#[async_trait]
impl DebugSink for NullSink {
    async fn save_step(&self, _step: u32, _snapshot: &PageSnapshot) -> Result<()> {
        Ok(())
    }

    async fn write_last_submit(&self, _record: &DiagnosticRecord) -> Result<()> {
        Ok(())
    }
}

fn app() -> axum::Router {
    let cfg = SolverConfig { shared_secret: "letmein".into(), ..SolverConfig::default() };
    router(AppState::with_sink(cfg, Arc::new(NullSink)))
}

fn quiz_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/quiz")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_answers_ok() {
    let resp = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn wrong_secret_is_forbidden() {
    let resp = app()
        .oneshot(quiz_request(json!({
            "email": "student@example.com",
            "secret": "nope",
            "url": "https://quiz.test/q/1",
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(resp).await, json!({"detail": "Invalid secret"}));
}

#[tokio::test]
async fn test_url_skips_the_browser() {
    let req = json!({
        "email": "student@example.com",
        "secret": "letmein",
        "url": TEST_NO_BROWSER,
    });
    let resp = app().oneshot(quiz_request(req.clone())).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["correct"], false);
    assert_eq!(body["reason"], "test mode - no browser launched");
    assert_eq!(body["attempted_payload"], req);
}

#[tokio::test]
async fn malformed_body_is_rejected_before_solving() {
    let resp = app()
        .oneshot(quiz_request(json!({"email": "student@example.com"})))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}
