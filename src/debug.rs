use crate::navigator::PageSnapshot;
use crate::submit::SubmissionPayload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::info;

/// Step offset for the extra page a scrape instruction visits.
pub const SCRAPE_STEP_OFFSET: u32 = 1000;

/// The most recent submission attempt. One slot, overwritten every time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub timestamp: DateTime<Utc>,
    pub submit_url: String,
    pub payload: SubmissionPayload,
    pub response: Value,
}

impl DiagnosticRecord {
    pub fn new(submit_url: impl Into<String>, payload: SubmissionPayload, response: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            submit_url: submit_url.into(),
            payload,
            response,
        }
    }
}

/// Where debug artifacts go. Failures are reported to the caller, which logs and moves on.
#[async_trait]
pub trait DebugSink: Send + Sync {
    async fn save_step(&self, step: u32, snapshot: &PageSnapshot) -> Result<()>;
    async fn write_last_submit(&self, record: &DiagnosticRecord) -> Result<()>;
}

pub struct DiskDebugSink {
    base_dir: PathBuf,
    screenshots: bool,
    html: bool,
}

impl DiskDebugSink {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self { base_dir: base.as_ref().to_path_buf(), screenshots: true, html: true }
    }

    pub fn with_flags(mut self, screenshots: bool, html: bool) -> Self {
        self.screenshots = screenshots;
        self.html = html;
        self
    }

    pub fn step_path(&self, step: u32, ext: &str) -> PathBuf {
        self.base_dir.join(format!("dbg_step_{step}.{ext}"))
    }

    pub fn last_submit_path(&self) -> PathBuf {
        self.base_dir.join("last_submit.json")
    }
}

#[async_trait]
impl DebugSink for DiskDebugSink {
    async fn save_step(&self, step: u32, snapshot: &PageSnapshot) -> Result<()> {
        async_fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("create_dir {}", self.base_dir.display()))?;
        if self.screenshots {
            if let Some(b64) = &snapshot.image_base64 {
                let png = B64.decode(b64).context("b64 decode")?;
                let path = self.step_path(step, "png");
                async_fs::write(&path, &png)
                    .await
                    .with_context(|| format!("write {}", path.display()))?;
                info!(step, snapshot = %snapshot.id, path = %path.display(), "saved screenshot");
            }
        }
        if self.html {
            let path = self.step_path(step, "html");
            async_fs::write(&path, snapshot.html.as_bytes())
                .await
                .with_context(|| format!("write {}", path.display()))?;
            info!(step, snapshot = %snapshot.id, path = %path.display(), "saved HTML");
        }
        Ok(())
    }

    async fn write_last_submit(&self, record: &DiagnosticRecord) -> Result<()> {
        async_fs::create_dir_all(&self.base_dir).await?;
        let path = self.last_submit_path();
        let body = serde_json::to_vec_pretty(record)?;
        async_fs::write(&path, body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "wrote last submit diagnostic");
        Ok(())
    }
}
