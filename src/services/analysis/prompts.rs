//! Analysis Prompts
//!
//! Batch prompt text and per-type JSON response schemas. Each payload carries
//! its queue item id, and the backend must echo it on the matching result.

use chronicle_core::{AnalysisType, ConversationPayload};
use serde_json::{json, Value};

use super::error::AnalysisResult;
use crate::utils::error::AppError;

fn instructions(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::WorkflowDetection => {
            "Identify repeatable workflows in each conversation: recurring sequences of \
             steps the user performs, with the tools involved. Give every workflow a short \
             name, a one-sentence description, the ordered steps and the tools used. \
             Return an empty list when there is no workflow."
        }
        AnalysisType::LearningExtraction => {
            "Extract durable learnings from each conversation: facts, fixes, gotchas or \
             preferences worth remembering later. Give each learning a category, the \
             content as one self-contained sentence, a confidence between 0 and 1, and \
             a few tags."
        }
        AnalysisType::Summarization => {
            "Summarize each conversation in two or three sentences, list its main topics, \
             and state the outcome if one is visible."
        }
        AnalysisType::Deduplication => "Identify duplicate conversations.",
    }
}

/// Build the prompt for one batch.
pub fn build_prompt(
    analysis_type: AnalysisType,
    payloads: &[ConversationPayload],
) -> AnalysisResult<String> {
    let conversations = serde_json::to_string(payloads).map_err(AppError::from)?;
    let schema = serde_json::to_string(&response_schema(analysis_type)).map_err(AppError::from)?;

    Ok(format!(
        "You are analyzing AI assistant conversation logs.\n\n\
         Task: {task}\n\n\
         Some conversations are truncated (was_truncated) or carry only their title \
         (metadata_only); analyze what is present.\n\n\
         Respond with JSON only, no prose and no code fences, matching this schema:\n\
         {schema}\n\n\
         Return exactly one entry in \"results\" per conversation, and copy the \
         conversation's \"id\" into the entry's \"id\" unchanged.\n\n\
         Conversations:\n{conversations}\n",
        task = instructions(analysis_type),
    ))
}

/// JSON schema of the `{"results": [...]}` response for `analysis_type`
pub fn response_schema(analysis_type: AnalysisType) -> Value {
    let string_array = json!({ "type": "array", "items": { "type": "string" } });

    let (fields, required): (Value, Vec<&str>) = match analysis_type {
        AnalysisType::WorkflowDetection => (
            json!({
                "workflows": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "description": { "type": "string" },
                            "steps": string_array,
                            "tools": string_array,
                        },
                        "required": ["name", "description", "steps"],
                    }
                }
            }),
            vec!["id", "workflows"],
        ),
        AnalysisType::LearningExtraction => (
            json!({
                "learnings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "category": { "type": "string" },
                            "content": { "type": "string" },
                            "confidence": { "type": "number" },
                            "tags": string_array,
                        },
                        "required": ["category", "content"],
                    }
                }
            }),
            vec!["id", "learnings"],
        ),
        AnalysisType::Summarization => (
            json!({
                "summary": { "type": "string" },
                "topics": string_array,
                "outcome": { "type": "string" },
            }),
            vec!["id", "summary"],
        ),
        AnalysisType::Deduplication => (json!({}), vec!["id"]),
    };

    let mut properties = json!({ "id": { "type": "string" } });
    if let (Some(target), Value::Object(extra)) = (properties.as_object_mut(), fields) {
        target.extend(extra);
    }

    json!({
        "type": "object",
        "properties": {
            "results": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        },
        "required": ["results"],
    })
}
