//! Analysis Queue Types
//!
//! Queue items, analysis types, backend identifiers and the typed result
//! schemas produced for each analysis type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

// ============================================================================
// AnalysisType
// ============================================================================

/// Kind of analysis requested for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Detect repeated multi-step workflows in a conversation
    WorkflowDetection,
    /// Extract reusable learnings (facts, preferences, corrections)
    LearningExtraction,
    /// Produce a short summary of the conversation
    Summarization,
    /// Merge duplicate learnings. Operates on extracted learnings, never on
    /// conversations, so it is not valid in the conversation queue.
    Deduplication,
}

impl AnalysisType {
    /// All analysis types that run against conversations.
    pub const CONVERSATION_TYPES: [AnalysisType; 3] = [
        AnalysisType::WorkflowDetection,
        AnalysisType::LearningExtraction,
        AnalysisType::Summarization,
    ];

    /// Whether items of this type may live in the conversation-keyed queue.
    pub fn is_conversation_scoped(&self) -> bool {
        !matches!(self, AnalysisType::Deduplication)
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::WorkflowDetection => "workflow_detection",
            AnalysisType::LearningExtraction => "learning_extraction",
            AnalysisType::Summarization => "summarization",
            AnalysisType::Deduplication => "deduplication",
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_detection" => Ok(AnalysisType::WorkflowDetection),
            "learning_extraction" => Ok(AnalysisType::LearningExtraction),
            "summarization" => Ok(AnalysisType::Summarization),
            "deduplication" => Ok(AnalysisType::Deduplication),
            _ => Err(CoreError::parse(format!("Unknown analysis type: {}", s))),
        }
    }
}

// ============================================================================
// QueueStatus
// ============================================================================

/// Lifecycle state of a queue item.
///
/// Transitions only move forward: `pending -> claimed -> completed|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Claimed)
                | (QueueStatus::Claimed, QueueStatus::Completed)
                | (QueueStatus::Claimed, QueueStatus::Failed)
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Pending => write!(f, "pending"),
            QueueStatus::Claimed => write!(f, "claimed"),
            QueueStatus::Completed => write!(f, "completed"),
            QueueStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "claimed" => Ok(QueueStatus::Claimed),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(CoreError::parse(format!("Unknown queue status: {}", s))),
        }
    }
}

// ============================================================================
// BackendKind
// ============================================================================

/// Which class of backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Local command-line tool run as a subprocess
    LocalCli,
    /// Remote structured-generation HTTP API
    RemoteApi,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::LocalCli => write!(f, "local_cli"),
            BackendKind::RemoteApi => write!(f, "remote_api"),
        }
    }
}

// ============================================================================
// QueueItem
// ============================================================================

/// One unit of requested analysis.
///
/// `id` doubles as the correlation id the backend is asked to echo back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub subject_id: String,
    pub analysis_type: AnalysisType,
    pub status: QueueStatus,
    pub priority: i64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub claimed_by: Option<String>,
    pub result_payload: Option<String>,
    pub backend_used: Option<String>,
    pub model_used: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl QueueItem {
    /// Build a fresh pending item
    pub fn new(
        id: impl Into<String>,
        subject_id: impl Into<String>,
        analysis_type: AnalysisType,
        priority: i64,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject_id: subject_id.into(),
            analysis_type,
            status: QueueStatus::Pending,
            priority,
            attempt_count: 0,
            max_attempts: 1,
            claimed_by: None,
            result_payload: None,
            backend_used: None,
            model_used: None,
            error_message: None,
            created_at: created_at.into(),
        }
    }

    /// Decode the stored result payload into its typed form
    pub fn decoded_result(&self) -> Option<AnalysisOutput> {
        self.result_payload
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

// ============================================================================
// Typed result schemas
// ============================================================================

/// A workflow detected in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowDetectionResult {
    #[serde(default)]
    pub workflows: Vec<DetectedWorkflow>,
}

/// A single learning extracted from a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub category: String,
    pub content: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LearningExtractionResult {
    #[serde(default)]
    pub learnings: Vec<Learning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Structured output of one analysis, tagged by analysis type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisOutput {
    WorkflowDetection(WorkflowDetectionResult),
    LearningExtraction(LearningExtractionResult),
    Summarization(SummaryResult),
}

impl AnalysisOutput {
    /// Decode a backend result object according to the analysis type.
    ///
    /// Unknown fields (including the echoed correlation id) are ignored.
    pub fn decode(analysis_type: AnalysisType, value: &Value) -> CoreResult<Self> {
        let decoded = match analysis_type {
            AnalysisType::WorkflowDetection => {
                AnalysisOutput::WorkflowDetection(serde_json::from_value(value.clone())?)
            }
            AnalysisType::LearningExtraction => {
                AnalysisOutput::LearningExtraction(serde_json::from_value(value.clone())?)
            }
            AnalysisType::Summarization => {
                AnalysisOutput::Summarization(serde_json::from_value(value.clone())?)
            }
            AnalysisType::Deduplication => {
                return Err(CoreError::validation(
                    "deduplication results are not produced by the conversation queue",
                ))
            }
        };
        Ok(decoded)
    }

    /// The analysis type this output belongs to
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            AnalysisOutput::WorkflowDetection(_) => AnalysisType::WorkflowDetection,
            AnalysisOutput::LearningExtraction(_) => AnalysisType::LearningExtraction,
            AnalysisOutput::Summarization(_) => AnalysisType::Summarization,
        }
    }
}
