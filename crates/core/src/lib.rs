//! Chronicle Core
//!
//! Shared types for the Chronicle Desktop analysis pipeline. This crate has no
//! dependency on storage, HTTP or async runtimes.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `analysis` - Queue items, analysis types and typed result schemas
//! - `conversation` - Conversation records, backend payloads and scan scopes
//! - `proxy` - Proxy configuration shared with the LLM crate

pub mod analysis;
pub mod conversation;
pub mod error;
pub mod proxy;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Analysis Queue ─────────────────────────────────────────────────────
pub use analysis::{
    AnalysisOutput, AnalysisType, BackendKind, DetectedWorkflow, Learning,
    LearningExtractionResult, QueueItem, QueueStatus, SummaryResult, WorkflowDetectionResult,
};

// ── Conversations ──────────────────────────────────────────────────────
pub use conversation::{Conversation, ConversationMessage, ConversationPayload, PayloadMessage, ScanScope};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};
