//! HTTP entry point: `POST /api/quiz` starts one chain, `GET /health` for liveness.

use crate::config::SolverConfig;
use crate::debug::{DebugSink, DiskDebugSink};
use crate::navigator::ChromiumNavigator;
use crate::solver::{ChainSolver, QuizRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Request URL that short-circuits the handler before any browser is launched.
pub const TEST_NO_BROWSER: &str = "TEST_NO_BROWSER";

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<SolverConfig>,
    sink: Arc<dyn DebugSink>,
}

impl AppState {
    pub fn new(cfg: SolverConfig) -> Self {
        let sink = DiskDebugSink::new(&cfg.debug_dir).with_flags(cfg.take_screenshots, cfg.save_html);
        Self::with_sink(cfg, Arc::new(sink))
    }

    pub fn with_sink(cfg: SolverConfig, sink: Arc<dyn DebugSink>) -> Self {
        Self { cfg: Arc::new(cfg), sink }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/quiz", post(handle_quiz))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn handle_quiz(
    State(state): State<AppState>,
    Json(req): Json<QuizRequest>,
) -> (StatusCode, Json<Value>) {
    if req.secret != state.cfg.shared_secret {
        warn!(email = %req.email, "rejected request with invalid secret");
        return (StatusCode::FORBIDDEN, Json(json!({ "detail": "Invalid secret" })));
    }

    if req.url == TEST_NO_BROWSER {
        return (
            StatusCode::OK,
            Json(json!({
                "correct": false,
                "reason": "test mode - no browser launched",
                "attempted_payload": req,
            })),
        );
    }

    info!(email = %req.email, url = %req.url, "solving quiz");
    let navigator = match ChromiumNavigator::launch(&state.cfg).await {
        Ok(n) => n,
        Err(e) => {
            let msg = format!("{e:#}");
            error!(error = %msg, "browser launch failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg })));
        }
    };
    let solver = ChainSolver::new(navigator, Arc::clone(&state.sink), (*state.cfg).clone());
    (StatusCode::OK, Json(solver.solve(&req).await))
}
