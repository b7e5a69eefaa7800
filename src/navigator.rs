use crate::browser::{Browser, BrowserConfig};
use crate::config::SolverConfig;
use anyhow::Result;
use async_trait::async_trait;
use nanoid::nanoid;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Rendered state of a page after it settled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub id: String,
    pub url: String,
    pub html: String,
    pub text: String,
    pub image_base64: Option<String>,
    pub captured_at_ms: u128,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: nanoid!(),
            url: url.into(),
            html: html.into(),
            text: text.into(),
            image_base64: None,
            captured_at_ms: now_ms(),
        }
    }

    pub fn screenshot_taken(&self) -> bool {
        self.image_base64.is_some()
    }
}

/// Page loading capability used by the chain controller.
#[async_trait]
pub trait Navigator: Send {
    /// Load `url`, wait for it to settle for `settle`, and capture its content.
    async fn load(&mut self, url: &str, settle: Duration) -> Result<PageSnapshot>;
    /// Release the underlying browser. Must be idempotent.
    async fn close(&mut self) -> Result<()>;
}

// ========================= Chromium Adapter =========================

pub struct ChromiumNavigator {
    browser: Browser,
    navigation_timeout: Duration,
    take_screenshots: bool,
}

impl ChromiumNavigator {
    pub async fn launch(cfg: &SolverConfig) -> Result<Self> {
        let browser = Browser::launch(BrowserConfig {
            headless: cfg.headless,
            no_sandbox: cfg.no_sandbox,
            user_agent: Some(cfg.user_agent.clone()),
            executable: cfg.chrome_executable.clone(),
        })
        .await?;
        info!(profile = ?browser.profile_path(), headless = cfg.headless, "browser launched");
        Ok(Self {
            browser,
            navigation_timeout: cfg.navigation_timeout,
            take_screenshots: cfg.take_screenshots,
        })
    }
}

#[async_trait]
impl Navigator for ChromiumNavigator {
    async fn load(&mut self, url: &str, settle: Duration) -> Result<PageSnapshot> {
        info!(url, "navigating");
        self.browser.goto(url, self.navigation_timeout).await?;
        self.browser.settle(settle).await;

        let html = self.browser.html().await?;
        let text = match self.browser.inner_text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(url, error = %e, "innerText unavailable, stripping markup");
                strip_markup(&html)
            }
        };
        let final_url = self.browser.url().await.unwrap_or_else(|_| url.to_string());
        let mut snap = PageSnapshot::new(final_url, html, text);
        if self.take_screenshots {
            match self.browser.screenshot_b64().await {
                Ok(b64) => snap.image_base64 = Some(b64),
                Err(e) => warn!(url, error = %e, "screenshot failed"),
            }
        }
        Ok(snap)
    }

    async fn close(&mut self) -> Result<()> {
        self.browser.close().await
    }
}

// ========================= Helpers =========================

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Replace every tag with a space; the fallback when visible text can't be read.
pub fn strip_markup(html: &str) -> String {
    TAG_RE.replace_all(html, " ").into_owned()
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
