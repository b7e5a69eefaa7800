use anyhow::Result;
use clap::Parser;
use quiz_chain::server::{self, AppState};
use quiz_chain::SolverConfig;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quiz-chain")]
#[command(about = "Solve chains of machine-generated quiz pages")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quiz_chain=info".parse()?))
        .init();

    let args = Args::parse();
    let cfg = SolverConfig::from_env();
    info!(
        debug_dir = %cfg.debug_dir.display(),
        budget_secs = cfg.time_budget.as_secs(),
        "starting quiz-chain v{}",
        env!("CARGO_PKG_VERSION")
    );

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    server::serve(addr, AppState::new(cfg)).await
}
