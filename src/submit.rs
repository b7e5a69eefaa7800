//! Answer submission with the POST → GET / Location fallback chain.
//!
//! Every attempt gets its own short-lived client with redirects disabled.
//! Whatever the terminal outcome is, it gets written to the debug sink as the
//! single "last submit" record before it is returned.

use crate::config::SolverConfig;
use crate::debug::{DebugSink, DiagnosticRecord};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

// ========================= Payload =========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Number(f64),
    Text(String),
}

impl From<Answer> for Value {
    fn from(a: Answer) -> Self {
        match a {
            Answer::Number(n) => json!(n),
            Answer::Text(s) => Value::String(s),
        }
    }
}

/// Body of one submission attempt. Built once, never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionPayload(Map<String, Value>);

impl SubmissionPayload {
    pub fn new(email: &str, secret: &str, url: &str, answer: Answer) -> Self {
        let mut map = Map::new();
        map.insert("email".into(), Value::String(email.into()));
        map.insert("secret".into(), Value::String(secret.into()));
        map.insert("url".into(), Value::String(url.into()));
        map.insert("answer".into(), answer.into());
        Self(map)
    }

    /// Fill the four standard keys into `literal`, keeping anything it already has.
    pub fn from_literal(
        mut literal: Map<String, Value>,
        email: &str,
        secret: &str,
        url: &str,
        answer: &str,
    ) -> Self {
        for (key, value) in [("email", email), ("secret", secret), ("url", url), ("answer", answer)] {
            literal
                .entry(key)
                .or_insert_with(|| Value::String(value.to_string()));
        }
        Self(literal)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Flatten to query parameters for the GET fallbacks. Nulls are dropped.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k.clone(), s.clone())),
                other => Some((k.clone(), other.to_string())),
            })
            .collect()
    }
}

// ========================= Outcome =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The request never produced a usable response.
    Transport,
    /// A response arrived but none of the fallbacks turned it into JSON.
    Parse,
}

impl DiagnosticKind {
    pub fn reason(self) -> &'static str {
        match self {
            DiagnosticKind::Transport => "Submission transport failure",
            DiagnosticKind::Parse => "Submission returned a non-JSON response",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    Parsed(Value),
    Diagnostic {
        kind: DiagnosticKind,
        status: Option<u16>,
        text: String,
        headers: BTreeMap<String, String>,
    },
}

impl SubmitOutcome {
    fn diagnostic(
        kind: DiagnosticKind,
        status: Option<u16>,
        text: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        SubmitOutcome::Diagnostic { kind, status, text: text.into(), headers }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, SubmitOutcome::Parsed(_))
    }

    /// Continuation link from a parsed response, if the endpoint sent one.
    pub fn continuation(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Parsed(v) => v
                .get("url")
                .and_then(|u| u.as_str())
                .map(str::trim)
                .filter(|u| !u.is_empty()),
            SubmitOutcome::Diagnostic { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SubmitOutcome::Parsed(v) => v.clone(),
            SubmitOutcome::Diagnostic { kind, status, text, headers } => json!({
                "correct": false,
                "reason": kind.reason(),
                "status_code": status,
                "text": text,
                "headers": headers,
            }),
        }
    }
}

// ========================= Protocol =========================

pub struct Submitter {
    sink: Arc<dyn DebugSink>,
    timeout: Duration,
    user_agent: String,
}

impl Submitter {
    pub fn new(sink: Arc<dyn DebugSink>, cfg: &SolverConfig) -> Self {
        Self {
            sink,
            timeout: cfg.submit_timeout,
            user_agent: cfg.user_agent.clone(),
        }
    }

    pub async fn submit(&self, submit_url: &str, payload: &SubmissionPayload) -> SubmitOutcome {
        info!(submit_url, payload = %serde_json::Value::Object(payload.as_map().clone()), "submitting");
        let outcome = self.attempt(submit_url, payload).await;
        let record = DiagnosticRecord::new(submit_url, payload.clone(), outcome.to_json());
        if let Err(e) = self.sink.write_last_submit(&record).await {
            error!(error = %e, "failed to write last submit diagnostic");
        }
        outcome
    }

    fn client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(self.user_agent.clone())
            .build()
    }

    async fn attempt(&self, submit_url: &str, payload: &SubmissionPayload) -> SubmitOutcome {
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => {
                return SubmitOutcome::diagnostic(DiagnosticKind::Transport, None, e.to_string(), BTreeMap::new())
            }
        };

        let resp = match client
            .post(submit_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(submit_url, error = %e, "POST failed");
                return SubmitOutcome::diagnostic(DiagnosticKind::Transport, None, e.to_string(), BTreeMap::new());
            }
        };

        let status = resp.status().as_u16();
        info!(submit_url, status, "POST returned");
        let headers = header_map(resp.headers());
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return SubmitOutcome::diagnostic(DiagnosticKind::Transport, Some(status), e.to_string(), headers),
        };
        if let Some(v) = parse_json(&text) {
            return SubmitOutcome::Parsed(v);
        }

        if status == 405 {
            warn!(submit_url, "POST not allowed, retrying as GET");
            return match client.get(submit_url).query(&payload.query_pairs()).send().await {
                Ok(r) => read_outcome(r).await,
                Err(e) => {
                    error!(submit_url, error = %e, "GET fallback failed");
                    SubmitOutcome::diagnostic(DiagnosticKind::Transport, None, e.to_string(), headers)
                }
            };
        }

        if status == 200 && text.trim().is_empty() {
            if let Some(location) = headers.get("location").cloned() {
                let next = resolve_location(submit_url, &location);
                info!(location = %next, "following Location header");
                return match client.get(&next).send().await {
                    Ok(r) => read_outcome(r).await,
                    Err(e) => {
                        error!(location = %next, error = %e, "following Location failed");
                        SubmitOutcome::diagnostic(DiagnosticKind::Transport, Some(status), text, headers)
                    }
                };
            }

            info!(submit_url, "POST returned an empty body, retrying as GET");
            return match client.get(submit_url).query(&payload.query_pairs()).send().await {
                Ok(r) => read_outcome(r).await,
                Err(e) => {
                    error!(submit_url, error = %e, "GET after empty POST failed");
                    SubmitOutcome::diagnostic(DiagnosticKind::Transport, Some(status), text, headers)
                }
            };
        }

        SubmitOutcome::diagnostic(DiagnosticKind::Parse, Some(status), text, headers)
    }
}

async fn read_outcome(resp: Response) -> SubmitOutcome {
    let status = resp.status().as_u16();
    info!(url = %resp.url(), status, "GET returned");
    let headers = header_map(resp.headers());
    match resp.text().await {
        Ok(text) => match parse_json(&text) {
            Some(v) => SubmitOutcome::Parsed(v),
            None => SubmitOutcome::diagnostic(DiagnosticKind::Parse, Some(status), text, headers),
        },
        Err(e) => SubmitOutcome::diagnostic(DiagnosticKind::Transport, Some(status), e.to_string(), headers),
    }
}

fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

fn resolve_location(base: &str, location: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_keys_survive_default_filling() {
        let literal = json!({"email": "mine@x.y", "answer": 7, "extra": true});
        let payload = SubmissionPayload::from_literal(
            literal.as_object().cloned().unwrap_or_default(),
            "session@x.y",
            "s3cr3t",
            "https://quiz.test/demo",
            "I solved it",
        );
        assert_eq!(payload.get("email"), Some(&json!("mine@x.y")));
        assert_eq!(payload.get("answer"), Some(&json!(7)));
        assert_eq!(payload.get("secret"), Some(&json!("s3cr3t")));
        assert_eq!(payload.get("url"), Some(&json!("https://quiz.test/demo")));
        assert_eq!(payload.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn query_pairs_stringify_values_and_drop_nulls() {
        let mut map = Map::new();
        map.insert("answer".into(), json!(30.5));
        map.insert("email".into(), json!("a@b.c"));
        map.insert("gone".into(), Value::Null);
        let pairs = SubmissionPayload::from_literal(map, "x", "s", "u", "p").query_pairs();
        assert!(pairs.contains(&("answer".to_string(), "30.5".to_string())));
        assert!(pairs.contains(&("email".to_string(), "a@b.c".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "gone"));
    }

    #[test]
    fn continuation_only_from_parsed_objects() {
        assert_eq!(
            SubmitOutcome::Parsed(json!({"correct": true, "url": "/next"})).continuation(),
            Some("/next")
        );
        assert_eq!(SubmitOutcome::Parsed(json!({"correct": true, "url": ""})).continuation(), None);
        assert_eq!(SubmitOutcome::Parsed(json!([1, 2])).continuation(), None);
        let diag = SubmitOutcome::diagnostic(DiagnosticKind::Parse, Some(500), "oops", BTreeMap::new());
        assert_eq!(diag.continuation(), None);
        assert_eq!(diag.to_json()["status_code"], 500);
        assert_eq!(diag.to_json()["correct"], false);
    }

    #[test]
    fn location_resolves_relative_to_submit_url() {
        assert_eq!(
            resolve_location("https://quiz.test/api/submit", "/done?x=1"),
            "https://quiz.test/done?x=1"
        );
        assert_eq!(resolve_location("not a url", "/done"), "/done");
    }
}
