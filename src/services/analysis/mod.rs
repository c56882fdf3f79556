//! Conversation Analysis
//!
//! Background analysis of imported conversations:
//! - Durable queue contracts and their SQLite implementations
//! - Backend selection between local CLI tools and remote APIs
//! - Redaction and size-bounded payload preparation
//! - Subprocess execution with concurrent pipe draining and hard timeouts
//! - Adaptive batch splitting and tolerant result mapping
//! - The orchestrator driving cycles and full scans

pub mod backend;
pub mod cli_tools;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod payload;
pub mod progress;
pub mod prompts;
pub mod redaction;
pub mod selector;
pub mod splitter;
pub mod store;
pub mod subprocess;

pub use backend::{AnalysisBackend, CliBackend, RemoteApiBackend};
pub use cli_tools::{
    CliToolProbe, CliToolSpec, DetectedTool, FixedToolProbe, PathProbe, ToolCapabilities,
    KNOWN_TOOLS,
};
pub use error::{AnalysisError, AnalysisResult};
pub use mapper::{extract_results, map_results, MappingSummary};
pub use orchestrator::{AnalysisOrchestrator, CycleSummary, ScanSummary};
pub use payload::{
    apply_budget, build_payload, prepare, BudgetOutcome, ItemFailure, PayloadLimits,
    PreparedBatch, TruncationMode,
};
pub use progress::{
    AnalysisProgress, OrchestratorStatus, ProgressSender, ProgressSnapshot, ProgressTracker,
};
pub use redaction::redact;
pub use selector::{BackendSelector, ProviderFactory};
pub use splitter::{run_with_adaptive_split, SplitOutcome};
pub use store::{ConversationStore, QueueStore};
pub use subprocess::{ProcessOutput, SubprocessExecutor};
