pub mod browser;
pub mod classifier;
pub mod config;
pub mod debug;
pub mod navigator;
pub mod pdf;
pub mod resolve;
pub mod server;
pub mod solver;
pub mod submit;

pub use classifier::{classify, InstructionMatch};
pub use config::SolverConfig;
pub use debug::{DebugSink, DiagnosticRecord, DiskDebugSink};
pub use navigator::{ChromiumNavigator, Navigator, PageSnapshot};
pub use solver::{ChainSolver, QuizRequest, QuizSession, SolveError};
pub use submit::{Answer, SubmissionPayload, SubmitOutcome, Submitter};
