//! Analysis Backends
//!
//! The two ways a batch gets analyzed: a local CLI tool driven through the
//! subprocess executor, or a remote structured-generation API.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::{AnalysisType, BackendKind, ConversationPayload};
use chronicle_llm::StructuredProvider;
use tracing::debug;

use super::cli_tools::DetectedTool;
use super::error::{AnalysisError, AnalysisResult};
use super::payload::TruncationMode;
use super::prompts::{build_prompt, response_schema};
use super::subprocess::SubprocessExecutor;

/// Share of the model context window spent on conversation payloads
const REQUEST_BUDGET_PERCENT: usize = 60;

/// A backend able to analyze one batch of payloads
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Tool or provider name, e.g. "claude", "gemini"
    fn name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    /// Value stored as `backend_used`, e.g. "local_cli:claude"
    fn label(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }

    fn truncation_mode(&self) -> TruncationMode;

    /// Token budget per request, when the backend enforces one up front
    fn request_budget_tokens(&self) -> Option<usize> {
        None
    }

    /// Analyze `payloads`, returning the raw backend output.
    async fn execute(
        &self,
        analysis_type: AnalysisType,
        payloads: &[ConversationPayload],
    ) -> AnalysisResult<String>;
}

// ============================================================================
// Local CLI
// ============================================================================

/// Backend that pipes the prompt into a local CLI tool
pub struct CliBackend {
    tool: DetectedTool,
    executor: SubprocessExecutor,
}

impl CliBackend {
    pub fn new(tool: DetectedTool, executor: SubprocessExecutor) -> Self {
        Self { tool, executor }
    }

    pub fn tool(&self) -> &DetectedTool {
        &self.tool
    }
}

#[async_trait]
impl AnalysisBackend for CliBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalCli
    }

    fn name(&self) -> &str {
        &self.tool.name
    }

    fn truncation_mode(&self) -> TruncationMode {
        TruncationMode::Always
    }

    async fn execute(
        &self,
        analysis_type: AnalysisType,
        payloads: &[ConversationPayload],
    ) -> AnalysisResult<String> {
        let prompt = build_prompt(analysis_type, payloads)?;
        debug!(
            tool = %self.tool.name,
            items = payloads.len(),
            prompt_bytes = prompt.len(),
            "[AnalysisBackend] Running CLI batch"
        );

        let output = self
            .executor
            .run(&self.tool.path, &self.tool.args, &prompt)
            .await?;

        if output.stdout.trim().is_empty() {
            return Err(AnalysisError::invalid_response(format!(
                "{} produced no output",
                self.tool.name
            )));
        }
        Ok(output.stdout)
    }
}

// ============================================================================
// Remote API
// ============================================================================

/// Backend that calls a remote structured-generation provider
pub struct RemoteApiBackend {
    provider: Arc<dyn StructuredProvider>,
}

impl RemoteApiBackend {
    pub fn new(provider: Arc<dyn StructuredProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AnalysisBackend for RemoteApiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteApi
    }

    fn name(&self) -> &str {
        self.provider.name()
    }

    fn model(&self) -> Option<&str> {
        Some(self.provider.model())
    }

    fn truncation_mode(&self) -> TruncationMode {
        TruncationMode::OnOverflow
    }

    fn request_budget_tokens(&self) -> Option<usize> {
        Some(self.provider.context_window() as usize * REQUEST_BUDGET_PERCENT / 100)
    }

    async fn execute(
        &self,
        analysis_type: AnalysisType,
        payloads: &[ConversationPayload],
    ) -> AnalysisResult<String> {
        let prompt = build_prompt(analysis_type, payloads)?;
        let schema = response_schema(analysis_type);
        debug!(
            provider = self.provider.name(),
            model = self.provider.model(),
            items = payloads.len(),
            "[AnalysisBackend] Calling remote API"
        );

        let response = self.provider.generate_structured(&prompt, &schema).await?;
        if response.text.trim().is_empty() {
            return Err(AnalysisError::invalid_response(format!(
                "{} returned empty text",
                self.provider.name()
            )));
        }
        Ok(response.text)
    }
}
