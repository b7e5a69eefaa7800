use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide solver settings, built once and handed to every session.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Value a request's `secret` must match before any navigation happens.
    pub shared_secret: String,
    pub debug_dir: PathBuf,
    pub take_screenshots: bool,
    pub save_html: bool,
    pub user_agent: String,
    /// Wall-clock budget for one whole chain, fixed at session start.
    pub time_budget: Duration,
    pub navigation_timeout: Duration,
    pub submit_timeout: Duration,
    /// Pause after a page reports loaded, before reading its content.
    pub settle_delay: Duration,
    pub scrape_settle_delay: Duration,
    pub scrape_fetch_timeout: Duration,
    pub pdf_download_timeout: Duration,
    pub headless: bool,
    /// Pass `--no-sandbox` to Chromium. Only needed when running as root in a container.
    pub no_sandbox: bool,
    pub chrome_executable: Option<PathBuf>,
    /// Placeholder `answer` for POST-JSON literals that carry none.
    pub default_answer: String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            shared_secret: "quiz-secret".into(),
            debug_dir: PathBuf::from("debug_artifacts"),
            take_screenshots: true,
            save_html: true,
            user_agent: "LLM-Quiz-Solver/1.0".into(),
            time_budget: Duration::from_secs(180),
            navigation_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_millis(1000),
            scrape_settle_delay: Duration::from_millis(500),
            scrape_fetch_timeout: Duration::from_secs(30),
            pdf_download_timeout: Duration::from_secs(120),
            headless: true,
            no_sandbox: false,
            chrome_executable: None,
            default_answer: "I solved it".into(),
        }
    }
}

impl SolverConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            shared_secret: env::var("QUIZ_SHARED_SECRET").unwrap_or(default.shared_secret),
            debug_dir: env::var("QUIZ_DEBUG_DIR").map(PathBuf::from).unwrap_or(default.debug_dir),
            take_screenshots: parsed("QUIZ_TAKE_SCREENSHOTS").unwrap_or(default.take_screenshots),
            save_html: parsed("QUIZ_SAVE_HTML").unwrap_or(default.save_html),
            user_agent: env::var("QUIZ_USER_AGENT").unwrap_or(default.user_agent),
            time_budget: secs("QUIZ_TIME_BUDGET_SECS").unwrap_or(default.time_budget),
            navigation_timeout: secs("QUIZ_NAVIGATION_TIMEOUT_SECS").unwrap_or(default.navigation_timeout),
            submit_timeout: secs("QUIZ_SUBMIT_TIMEOUT_SECS").unwrap_or(default.submit_timeout),
            settle_delay: millis("QUIZ_SETTLE_MS").unwrap_or(default.settle_delay),
            scrape_settle_delay: millis("QUIZ_SCRAPE_SETTLE_MS").unwrap_or(default.scrape_settle_delay),
            scrape_fetch_timeout: secs("QUIZ_SCRAPE_FETCH_TIMEOUT_SECS").unwrap_or(default.scrape_fetch_timeout),
            pdf_download_timeout: secs("QUIZ_PDF_TIMEOUT_SECS").unwrap_or(default.pdf_download_timeout),
            headless: parsed("QUIZ_HEADLESS").unwrap_or(default.headless),
            no_sandbox: parsed("QUIZ_NO_SANDBOX").unwrap_or(default.no_sandbox),
            chrome_executable: env::var("QUIZ_CHROME_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .or(default.chrome_executable),
            default_answer: env::var("QUIZ_DEFAULT_ANSWER").unwrap_or(default.default_answer),
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn secs(key: &str) -> Option<Duration> {
    parsed::<u64>(key).map(Duration::from_secs)
}

fn millis(key: &str) -> Option<Duration> {
    parsed::<u64>(key).map(Duration::from_millis)
}
