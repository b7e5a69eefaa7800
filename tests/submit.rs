use anyhow::Result;
use async_trait::async_trait;
use quiz_chain::debug::{DebugSink, DiagnosticRecord};
use quiz_chain::submit::DiagnosticKind;
use quiz_chain::{Answer, PageSnapshot, SolverConfig, SubmissionPayload, SubmitOutcome, Submitter};
use serde_json::json;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

#[async_trait]
impl DebugSink for RecordingSink {
    async fn save_step(&self, _step: u32, _snapshot: &PageSnapshot) -> Result<()> {
        Ok(())
    }

    async fn write_last_submit(&self, record: &DiagnosticRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn payload(url: &str) -> SubmissionPayload {
    SubmissionPayload::new("student@example.com", "s3cr3t", url, Answer::Number(42.0))
}

fn submitter(sink: Arc<RecordingSink>) -> Submitter {
    Submitter::new(sink, &SolverConfig::default())
}

#[tokio::test]
async fn json_response_to_post_is_returned_and_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": true, "url": "/q/2"})))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let url = format!("{}/submit", server.uri());
    let outcome = submitter(sink.clone()).submit(&url, &payload("https://quiz.test/q/1")).await;

    assert_eq!(outcome, SubmitOutcome::Parsed(json!({"correct": true, "url": "/q/2"})));
    assert_eq!(outcome.continuation(), Some("/q/2"));

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].submit_url, url);
    assert_eq!(records[0].response["correct"], true);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["answer"], 42.0);
    assert_eq!(body["email"], "student@example.com");
}

#[tokio::test]
async fn method_not_allowed_retries_get_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(405))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/submit"))
        .and(query_param("answer", "42.0"))
        .and(query_param("secret", "s3cr3t"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still broken"))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let outcome = submitter(sink.clone())
        .submit(&format!("{}/submit", server.uri()), &payload("https://quiz.test/q/1"))
        .await;

    match &outcome {
        SubmitOutcome::Diagnostic { kind, status, text, .. } => {
            assert_eq!(*kind, DiagnosticKind::Parse);
            assert_eq!(*status, Some(500));
            assert_eq!(text, "still broken");
        }
        other => panic!("expected diagnostic, got {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(sink.records.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn method_not_allowed_then_json_get() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": true})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = submitter(Arc::new(RecordingSink::default()))
        .submit(&format!("{}/submit", server.uri()), &payload("https://quiz.test/q/1"))
        .await;
    assert_eq!(outcome, SubmitOutcome::Parsed(json!({"correct": true})));
}

#[tokio::test]
async fn empty_ok_with_location_follows_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", "/result"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": false, "reason": "wrong"})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = submitter(Arc::new(RecordingSink::default()))
        .submit(&format!("{}/submit", server.uri()), &payload("https://quiz.test/q/1"))
        .await;
    assert_eq!(outcome, SubmitOutcome::Parsed(json!({"correct": false, "reason": "wrong"})));
}

#[tokio::test]
async fn empty_ok_without_location_gets_same_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/submit"))
        .and(query_param("email", "student@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": true, "url": null})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = submitter(Arc::new(RecordingSink::default()))
        .submit(&format!("{}/submit", server.uri()), &payload("https://quiz.test/q/1"))
        .await;
    assert!(outcome.is_parsed());
    assert_eq!(outcome.continuation(), None);
}

#[tokio::test]
async fn other_non_json_response_is_a_diagnostic_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(502)
                .set_body_string("<html>bad gateway</html>")
                .insert_header("x-trace", "abc"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let outcome = submitter(sink.clone())
        .submit(&format!("{}/submit", server.uri()), &payload("https://quiz.test/q/1"))
        .await;

    let body = outcome.to_json();
    assert_eq!(body["correct"], false);
    assert_eq!(body["status_code"], 502);
    assert_eq!(body["headers"]["x-trace"], "abc");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(sink.records.lock().unwrap()[0].response, body);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_diagnostic() {
    // Nothing listens on port 1.
    let url = "http://127.0.0.1:1/submit";

    let sink = Arc::new(RecordingSink::default());
    let outcome = submitter(sink.clone()).submit(url, &payload("https://quiz.test/q/1")).await;

    match outcome {
        SubmitOutcome::Diagnostic { kind, status, headers, .. } => {
            assert_eq!(kind, DiagnosticKind::Transport);
            assert_eq!(status, None);
            assert!(headers.is_empty());
        }
        other => panic!("expected transport diagnostic, got {other:?}"),
    }
    assert_eq!(sink.records.lock().unwrap().len(), 1);
}
