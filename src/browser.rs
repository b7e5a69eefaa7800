use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// How long the resource count must stay flat before the page counts as idle.
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub no_sandbox: bool,
    pub user_agent: Option<String>,
    pub executable: Option<PathBuf>,
}

/// One Chromium process with a single page, owned by one solve session.
pub struct Browser {
    page: Page,
    browser: OxideBrowser,
    handler: JoinHandle<()>,
    /// Removed from disk when dropped.
    profile: Option<TempDir>,
    closed: bool,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &cfg.executable {
            builder = builder.chrome_executable(path);
        }
        // A fresh profile per session; concurrent sessions would otherwise fight over the lock.
        let profile = profile_dir()?;
        builder = builder
            .user_data_dir(profile.path())
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-dev-shm-usage");
        if cfg.no_sandbox {
            builder = builder.arg("--no-sandbox");
        }
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg)
            .await
            .context("failed to launch Chromium")?;
        let handler = tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open page")?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        // Non-zero viewport, otherwise full-page screenshots can fail on empty documents.
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(1280)
            .height(800)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        let _ = page.execute(metrics).await;
        Ok(Self { page, browser, handler, profile: Some(profile), closed: false })
    }

    pub fn profile_path(&self) -> Option<&Path> {
        self.profile.as_ref().map(TempDir::path)
    }

    /// Navigate, wait for the load event, then for network activity to die down.
    /// Both waits share `limit`; a page that never goes idle is read as it is.
    pub async fn goto(&self, url: &str, limit: Duration) -> Result<()> {
        let started = Instant::now();
        let nav = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        timeout(limit, nav)
            .await
            .with_context(|| format!("navigation to {url} timed out after {limit:?}"))?
            .with_context(|| format!("navigation to {url} failed"))?;

        let remaining = limit.saturating_sub(started.elapsed());
        self.wait_for_network_idle(url, remaining).await;
        Ok(())
    }

    async fn wait_for_network_idle(&self, url: &str, limit: Duration) {
        if limit.is_zero() {
            warn!(url, "no time left to wait for network idle");
            return;
        }
        let params = match EvaluateParams::builder()
            .expression(network_idle_script(limit, NETWORK_IDLE_WINDOW))
            .await_promise(true)
            .return_by_value(true)
            .build()
        {
            Ok(p) => p,
            Err(e) => {
                warn!(url, error = %e, "could not build network idle check");
                return;
            }
        };
        // The script gives up on its own at `limit`; the outer bound covers a wedged page.
        let waited = timeout(limit + Duration::from_secs(1), self.page.evaluate_expression(params)).await;
        match waited {
            Ok(Ok(result)) => match result.into_value::<IdleReport>() {
                Ok(report) if report.ok => {
                    debug!(url, waited_ms = report.waited_ms, resources = report.resources, "network idle")
                }
                Ok(report) => {
                    warn!(url, waited_ms = report.waited_ms, resources = report.resources, "network never went idle")
                }
                Err(e) => warn!(url, error = %e, "unreadable network idle report"),
            },
            Ok(Err(e)) => warn!(url, error = %e, "network idle check failed"),
            Err(_) => warn!(url, "network idle check timed out"),
        }
    }

    pub async fn settle(&self, delay: Duration) {
        sleep(delay).await;
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn html(&self) -> Result<String> {
        self.page.content().await.context("failed to read page HTML")
    }

    pub async fn inner_text(&self) -> Result<String> {
        let text: String = self
            .page
            .evaluate("document.body.innerText")
            .await
            .context("failed to evaluate body text")?
            .into_value()?;
        Ok(text)
    }

    pub async fn screenshot_b64(&self) -> Result<String> {
        let bytes = self
            .page
            .screenshot(ScreenshotParamsBuilder::default().full_page(true).build())
            .await
            .context("screenshot failed")?;
        Ok(STANDARD.encode(bytes))
    }

    /// Shut the browser down and remove its profile. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let res = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                warn!(profile = %path.display(), error = %e, "failed to remove browser profile");
            }
        }
        debug!("browser closed");
        res.map(|_| ()).context("failed to close browser")
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        if !self.closed {
            self.handler.abort();
        }
    }
}

// ========================= Helpers =========================

fn profile_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("quiz-chain-profile-")
        .tempdir()
        .context("failed to create browser profile dir")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdleReport {
    ok: bool,
    #[serde(default)]
    waited_ms: u64,
    #[serde(default)]
    resources: u64,
}

/// In-page poll: idle once the document is complete and the number of fetched
/// resources has not changed for `window`. Resolves with an [`IdleReport`].
fn network_idle_script(limit: Duration, window: Duration) -> String {
    let timeout_ms = limit.as_millis().min(u128::from(u64::MAX)) as u64;
    let idle_ms = window.as_millis().min(u128::from(u64::MAX)) as u64;
    format!(
        r#"(async () => {{
            const timeoutMs = {timeout_ms};
            const idleMs = {idle_ms};
            const interval = 100;
            const count = () => {{
                try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }}
            }};
            const start = Date.now();
            let last = count();
            let stable = 0;
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                const cur = count();
                if (document.readyState === 'complete' && cur === last) {{
                    stable += interval;
                    if (stable >= idleMs) {{
                        return {{ ok: true, waitedMs: Date.now() - start, resources: cur }};
                    }}
                }} else {{
                    stable = 0;
                }}
                last = cur;
            }}
            return {{ ok: false, waitedMs: Date.now() - start, resources: last }};
        }})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_script_carries_both_bounds() {
        let js = network_idle_script(Duration::from_secs(2), Duration::from_millis(500));
        assert!(js.contains("const timeoutMs = 2000;"));
        assert!(js.contains("const idleMs = 500;"));
        assert!(js.contains("document.readyState === 'complete'"));
    }

    #[test]
    fn idle_report_reads_camel_case() {
        let report: IdleReport =
            serde_json::from_value(serde_json::json!({"ok": true, "waitedMs": 740, "resources": 3}))
                .expect("report");
        assert!(report.ok);
        assert_eq!(report.waited_ms, 740);
        let partial: IdleReport = serde_json::from_value(serde_json::json!({"ok": false})).expect("partial");
        assert_eq!(partial.resources, 0);
    }

    #[test]
    fn profile_dirs_are_unique_and_removed_on_drop() {
        let a = profile_dir().expect("first profile");
        let b = profile_dir().expect("second profile");
        assert_ne!(a.path(), b.path());
        let path = a.path().to_path_buf();
        assert!(path.exists());
        drop(a);
        assert!(!path.exists());
    }

    #[tokio::test]
    #[ignore] // needs a local Chromium
    async fn close_removes_profile() {
        let mut browser = Browser::launch(BrowserConfig {
            headless: true,
            no_sandbox: false,
            user_agent: None,
            executable: None,
        })
        .await
        .expect("launch");
        let profile = browser.profile_path().expect("profile").to_path_buf();
        assert!(profile.exists());
        browser.close().await.expect("close");
        assert!(!profile.exists());
        assert!(browser.profile_path().is_none());
    }
}
