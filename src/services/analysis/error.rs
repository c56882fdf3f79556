//! Analysis Errors
//!
//! Failure taxonomy for the analysis pipeline. Item-local failures end up as
//! the item's `failed` status; backend-level failures fail the current batch.

use std::time::Duration;

use chronicle_llm::LlmError;
use thiserror::Error;

use crate::utils::error::AppError;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Consent is off, or neither a capable CLI tool nor a remote API is configured
    #[error("No analysis backend available: {0}")]
    NoBackendAvailable(String),

    /// The CLI binary could not be spawned
    #[error("CLI tool not found: {0}")]
    ToolNotFound(String),

    /// The subprocess exceeded its wall-clock limit and was killed
    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    /// Input exceeds what the backend accepts; retried by splitting
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The subprocess exited unsuccessfully
    #[error("Process exited with code {}: {stderr}", exit_code_label(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// Backend output could not be parsed into results
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Queue error: {0}")]
    Queue(String),

    /// Remote API failure other than size
    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Storage(#[from] AppError),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl AnalysisError {
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, AnalysisError::PayloadTooLarge(_))
    }
}

impl From<LlmError> for AnalysisError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ContextLengthExceeded { message, .. } => Self::PayloadTooLarge(message),
            LlmError::ParseError { message } => Self::InvalidResponse(message),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(AppError::from(err))
    }
}
