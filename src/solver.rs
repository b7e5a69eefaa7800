use crate::classifier::{classify, find_submit_url, resolve, InstructionMatch};
use crate::config::SolverConfig;
use crate::debug::{DebugSink, SCRAPE_STEP_OFFSET};
use crate::navigator::{Navigator, PageSnapshot};
use crate::pdf::{DocumentParser, LopdfParser};
use crate::resolve::{extract_secret, numeric_from_text, parse_json_literal, pdf_sum};
use crate::submit::{Answer, SubmissionPayload, Submitter};
use anyhow::Context;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

// ========================= Core Types =========================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuizRequest {
    pub email: String,
    pub secret: String,
    pub url: String,
}

/// State of one chain run. Owned by a single `solve` call.
#[derive(Debug)]
pub struct QuizSession {
    pub id: String,
    pub current_url: String,
    pub started: Instant,
    pub step_index: u32,
    pub last_response: Value,
}

impl QuizSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: nanoid!(),
            current_url: url.into(),
            started: Instant::now(),
            step_index: 0,
            last_response: json!({"correct": false, "reason": "No attempts made"}),
        }
    }

    fn advance(&mut self) -> u32 {
        self.step_index += 1;
        self.step_index
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("failed to fetch scrape URL {scrape_url}: {message}")]
    ScrapeFetch { scrape_url: String, message: String },
    #[error("no secret found on {scrape_url}")]
    SecretNotFound { scrape_url: String, snippet: String },
    #[error("no answer could be extracted from the page")]
    Extraction { snippet: String },
    #[error("no submit URL found")]
    NoSubmitUrl { attempted: SubmissionPayload },
    #[error("time budget of {budget:?} exceeded")]
    Timeout { budget: Duration },
}

impl SolveError {
    pub fn reason(&self) -> String {
        match self {
            SolveError::Navigation { .. } => "Navigation failed".into(),
            SolveError::ScrapeFetch { .. } => "Failed to fetch scrape URL".into(),
            SolveError::SecretNotFound { .. } => "Could not find secret on scrape page".into(),
            SolveError::Extraction { .. } => "Could not auto-solve".into(),
            SolveError::NoSubmitUrl { .. } => "No submit URL found".into(),
            SolveError::Timeout { budget } => format!("Timeout exceeded ({}s)", budget.as_secs()),
        }
    }

    /// The `{correct: false, reason, ...}` body handed back to the caller.
    pub fn into_response(self, last_response: Value) -> Value {
        let mut body = json!({ "correct": false, "reason": self.reason() });
        match self {
            SolveError::Navigation { url, message } => {
                body["url"] = json!(url);
                body["error"] = json!(message);
            }
            SolveError::ScrapeFetch { scrape_url, message } => {
                body["scrape_url"] = json!(scrape_url);
                body["error"] = json!(message);
            }
            SolveError::SecretNotFound { scrape_url, snippet } => {
                body["scrape_url"] = json!(scrape_url);
                body["page_snippet"] = json!(snippet);
            }
            SolveError::Extraction { snippet } => {
                body["page_text_snippet"] = json!(snippet);
            }
            SolveError::NoSubmitUrl { attempted } => {
                body["attempted_answer"] = json!(attempted);
            }
            SolveError::Timeout { .. } => {}
        }
        body["last_response"] = last_response;
        body
    }
}

// ========================= Chain Controller =========================

pub struct ChainSolver<N: Navigator> {
    navigator: N,
    parser: Arc<dyn DocumentParser>,
    sink: Arc<dyn DebugSink>,
    submitter: Submitter,
    cfg: SolverConfig,
}

impl<N: Navigator> ChainSolver<N> {
    pub fn new(navigator: N, sink: Arc<dyn DebugSink>, cfg: SolverConfig) -> Self {
        Self {
            navigator,
            parser: Arc::new(LopdfParser),
            submitter: Submitter::new(Arc::clone(&sink), &cfg),
            sink,
            cfg,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Follow the chain from `request.url` until a response has no continuation,
    /// something fails, or the budget runs out. The navigator is closed on every path.
    pub async fn solve(mut self, request: &QuizRequest) -> Value {
        let mut session = QuizSession::new(request.url.clone());
        let span = info_span!("solve", session = %session.id);
        let result = self.run(&mut session, request).instrument(span).await;

        if let Err(e) = self.navigator.close().await {
            warn!(session = %session.id, error = %e, "failed to close navigator");
        }

        match result {
            Ok(final_response) => {
                info!(session = %session.id, steps = session.step_index, "chain finished");
                final_response
            }
            Err(err) => {
                warn!(session = %session.id, steps = session.step_index, error = %err, "chain stopped");
                err.into_response(session.last_response)
            }
        }
    }

    async fn run(&mut self, session: &mut QuizSession, request: &QuizRequest) -> Result<Value, SolveError> {
        loop {
            if session.started.elapsed() >= self.cfg.time_budget {
                return Err(SolveError::Timeout { budget: self.cfg.time_budget });
            }

            let step = session.advance();
            let page = self
                .navigator
                .load(&session.current_url, self.cfg.settle_delay)
                .await
                .map_err(|e| SolveError::Navigation {
                    url: session.current_url.clone(),
                    message: format!("{e:#}"),
                })?;
            self.capture(step, &page).await;

            let instruction = classify(&page.text, &page.html, &session.current_url);
            info!(step, kind = instruction.kind(), url = %session.current_url, "classified page");

            let (submit_url, payload) = match instruction {
                InstructionMatch::ScrapeRedirect { path } => {
                    self.scrape_submission(session, step, &page, &path, request).await?
                }
                InstructionMatch::PostJsonLiteral { submit_url, json_text } => {
                    let payload = SubmissionPayload::from_literal(
                        parse_json_literal(&json_text),
                        &request.email,
                        &request.secret,
                        &session.current_url,
                        &self.cfg.default_answer,
                    );
                    (submit_url, payload)
                }
                InstructionMatch::PdfFallback { pdf_link } => {
                    let answer = self
                        .pdf_answer(&pdf_link)
                        .await
                        .ok_or_else(|| SolveError::Extraction { snippet: snippet(&page.text, 1200) })?;
                    fallback_submission(session, &page, request, answer)?
                }
                InstructionMatch::NumericFallback | InstructionMatch::None => {
                    let answer = numeric_from_text(&page.text)
                        .ok_or_else(|| SolveError::Extraction { snippet: snippet(&page.text, 1200) })?;
                    fallback_submission(session, &page, request, answer)?
                }
            };

            let outcome = self.submitter.submit(&submit_url, &payload).await;
            session.last_response = outcome.to_json();
            match outcome.continuation() {
                Some(next) => {
                    session.current_url = resolve(&session.current_url, next);
                    info!(step, next = %session.current_url, "continuing chain");
                }
                None => return Ok(session.last_response.clone()),
            }
        }
    }

    async fn scrape_submission(
        &mut self,
        session: &QuizSession,
        step: u32,
        page: &PageSnapshot,
        path: &str,
        request: &QuizRequest,
    ) -> Result<(String, SubmissionPayload), SolveError> {
        let scrape_url = resolve(&session.current_url, path);
        let scrape_text = match self.navigator.load(&scrape_url, self.cfg.scrape_settle_delay).await {
            Ok(scraped) => {
                self.capture(step + SCRAPE_STEP_OFFSET, &scraped).await;
                scraped.text
            }
            Err(e) => {
                warn!(scrape_url = %scrape_url, error = %e, "browser could not load scrape page, fetching directly");
                self.fetch_text(&scrape_url)
                    .await
                    .map_err(|e| SolveError::ScrapeFetch {
                        scrape_url: scrape_url.clone(),
                        message: format!("{e:#}"),
                    })?
            }
        };

        let secret = extract_secret(&scrape_text).ok_or_else(|| SolveError::SecretNotFound {
            scrape_url: scrape_url.clone(),
            snippet: snippet(&scrape_text, 800),
        })?;
        info!(step, scrape_url = %scrape_url, "found secret");

        let submit_url = find_submit_url(&page.html)
            .unwrap_or_else(|| resolve(&session.current_url, "/submit"));
        let payload = SubmissionPayload::new(
            &request.email,
            &request.secret,
            &session.current_url,
            Answer::Text(secret),
        );
        Ok((submit_url, payload))
    }

    async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        let client = reqwest::Client::builder()
            .timeout(self.cfg.scrape_fetch_timeout)
            .user_agent(self.cfg.user_agent.clone())
            .build()?;
        let text = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    async fn pdf_answer(&self, pdf_link: &str) -> Option<f64> {
        let bytes = match self.download(pdf_link).await {
            Ok(b) => b,
            Err(e) => {
                error!(pdf_link, error = %e, "PDF download failed");
                return None;
            }
        };
        let parser = Arc::clone(&self.parser);
        let sum = tokio::task::spawn_blocking(move || pdf_sum(parser.as_ref(), &bytes))
            .await
            .ok()
            .flatten();
        info!(pdf_link, sum = ?sum, "PDF resolved");
        sum
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let client = reqwest::Client::builder()
            .timeout(self.cfg.pdf_download_timeout)
            .user_agent(self.cfg.user_agent.clone())
            .build()?;
        let bytes = client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn capture(&self, step: u32, page: &PageSnapshot) {
        debug!(
            step,
            snapshot = %page.id,
            captured_at_ms = page.captured_at_ms as u64,
            screenshot = page.screenshot_taken(),
            "capturing page"
        );
        if let Err(e) = self.sink.save_step(step, page).await {
            error!(step, error = %e, "failed saving debug artifacts");
        }
    }
}

// ========================= Helpers =========================

fn fallback_submission(
    session: &QuizSession,
    page: &PageSnapshot,
    request: &QuizRequest,
    answer: f64,
) -> Result<(String, SubmissionPayload), SolveError> {
    let payload = SubmissionPayload::new(
        &request.email,
        &request.secret,
        &session.current_url,
        Answer::Number(answer),
    );
    match find_submit_url(&page.html) {
        Some(url) => Ok((url, payload)),
        None => Err(SolveError::NoSubmitUrl { attempted: payload }),
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_steps_start_at_one_and_increase() {
        let mut s = QuizSession::new("https://quiz.test/");
        assert_eq!(s.advance(), 1);
        assert_eq!(s.advance(), 2);
        assert_eq!(s.last_response["reason"], "No attempts made");
    }

    #[test]
    fn error_bodies_carry_context() {
        let body = SolveError::Timeout { budget: Duration::from_secs(180) }
            .into_response(json!({"correct": true, "url": "/next"}));
        assert_eq!(body["correct"], false);
        assert_eq!(body["reason"], "Timeout exceeded (180s)");
        assert_eq!(body["last_response"]["url"], "/next");

        let payload = SubmissionPayload::new("a@b.c", "s", "https://quiz.test/", Answer::Number(42.0));
        let body = SolveError::NoSubmitUrl { attempted: payload }.into_response(Value::Null);
        assert_eq!(body["reason"], "No submit URL found");
        assert_eq!(body["attempted_answer"]["answer"], 42.0);
    }

    #[test]
    fn snippet_counts_characters_not_bytes() {
        assert_eq!(snippet("héllo wörld", 4), "héll");
    }
}
