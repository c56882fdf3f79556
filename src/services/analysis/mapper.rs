//! Result Mapper
//!
//! Pulls per-item result objects out of whatever shape a backend produced and
//! records each claimed item as completed or failed.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chronicle_core::{AnalysisOutput, AnalysisType, QueueItem};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{AnalysisError, AnalysisResult};
use super::payload::ItemFailure;
use super::store::QueueStore;
use crate::utils::error::AppError;

/// Envelope fields whose string value may hold the real output
const TEXT_FIELDS: &[&str] = &["result", "text", "response", "content", "output"];

/// Nested envelope objects worth descending into
const NESTED_FIELDS: &[&str] = &["item", "message", "msg", "data"];

const MAX_DEPTH: usize = 6;

pub const NO_RESULT_REASON: &str = "no result returned by backend";

/// Outcome counts of one mapping pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingSummary {
    pub completed: usize,
    pub failed: usize,
}

impl MappingSummary {
    pub fn merge(&mut self, other: MappingSummary) {
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").ok())
        .as_ref()
}

/// Extract result objects whose `id` is in `known_ids`.
///
/// Accepts a bare array, `{"results": [...]}`, CLI envelopes whose text field
/// holds the output, fenced code blocks and NDJSON. Fails only when nothing in
/// `raw` parses as JSON at all.
pub fn extract_results(raw: &str, known_ids: &HashSet<String>) -> AnalysisResult<Vec<Value>> {
    let mut results = Vec::new();
    if parse_text(raw, known_ids, 0, &mut results) {
        Ok(results)
    } else {
        Err(AnalysisError::invalid_response(format!(
            "backend output is not JSON ({} bytes)",
            raw.len()
        )))
    }
}

/// Returns whether any JSON was found in `text`.
fn parse_text(text: &str, known: &HashSet<String>, depth: usize, out: &mut Vec<Value>) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || depth > MAX_DEPTH {
        return false;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        collect(&value, known, depth, out);
        return true;
    }

    let mut found = false;
    if let Some(fence) = fence_regex() {
        for caps in fence.captures_iter(trimmed) {
            if let Some(body) = caps.get(1) {
                found |= parse_text(body.as_str(), known, depth + 1, out);
            }
        }
    }
    if found {
        return true;
    }

    // NDJSON: one value per line, anything unparseable is skipped
    for line in trimmed.lines() {
        if let Ok(value) = serde_json::from_str::<Value>(line.trim()) {
            if value.is_object() || value.is_array() {
                collect(&value, known, depth, out);
                found = true;
            }
        }
    }
    if found {
        return true;
    }

    // JSON surrounded by prose
    if let Some(inner) = outermost_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            collect(&value, known, depth, out);
            return true;
        }
    }

    false
}

fn outermost_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn collect(value: &Value, known: &HashSet<String>, depth: usize, out: &mut Vec<Value>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, known, depth + 1, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("id") {
                if known.contains(id) {
                    out.push(value.clone());
                    return;
                }
            }
            if let Some(results) = map.get("results") {
                collect(results, known, depth + 1, out);
            }
            for field in TEXT_FIELDS {
                match map.get(*field) {
                    Some(Value::String(text)) => {
                        parse_text(text, known, depth + 1, out);
                    }
                    Some(nested @ (Value::Object(_) | Value::Array(_))) => {
                        collect(nested, known, depth + 1, out);
                    }
                    _ => {}
                }
            }
            for field in NESTED_FIELDS {
                if let Some(nested @ Value::Object(_)) = map.get(*field) {
                    collect(nested, known, depth + 1, out);
                }
            }
        }
        Value::String(text) => {
            parse_text(text, known, depth + 1, out);
        }
        _ => {}
    }
}

/// Record failures collected before mapping. Items already resolved are skipped.
///
/// A store error does not stop the remaining items from being attempted; the
/// first one is returned once every failure has been tried.
pub async fn apply_failures(
    store: &dyn QueueStore,
    failures: &[ItemFailure],
) -> AnalysisResult<MappingSummary> {
    let mut summary = MappingSummary::default();
    let mut first_error = None;
    for failure in failures {
        match store.mark_failed(&failure.item_id, &failure.reason).await {
            Ok(true) => summary.failed += 1,
            Ok(false) => {
                debug!(item_id = %failure.item_id, "[ResultMapper] Item already resolved");
            }
            Err(e) => {
                warn!(item_id = %failure.item_id, error = %e, "[ResultMapper] Could not mark item failed");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(summary),
    }
}

/// Map raw backend output onto `items`, resolving every one of them.
pub async fn map_results(
    store: &dyn QueueStore,
    raw: &str,
    items: &[QueueItem],
    analysis_type: AnalysisType,
    backend: &str,
    model: Option<&str>,
) -> AnalysisResult<MappingSummary> {
    let known: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();

    let results = match extract_results(raw, &known) {
        Ok(results) => results,
        Err(e) => {
            warn!(items = items.len(), error = %e, "[ResultMapper] Unparseable backend output");
            let reason = e.to_string();
            let failures: Vec<ItemFailure> = items.iter().map(|i| ItemFailure::new(&i.id, &reason)).collect();
            return apply_failures(store, &failures).await;
        }
    };

    // First result per id wins
    let mut by_id: HashMap<String, Value> = HashMap::new();
    for result in results {
        if let Some(id) = result.get("id").and_then(Value::as_str) {
            by_id.entry(id.to_string()).or_insert_with(|| result.clone());
        }
    }

    let mut summary = MappingSummary::default();
    for item in items {
        let outcome = match by_id.get(&item.id) {
            Some(value) => AnalysisOutput::decode(analysis_type, value)
                .map_err(|e| format!("invalid result: {}", e)),
            None => Err(NO_RESULT_REASON.to_string()),
        };

        let resolved = match outcome {
            Ok(output) => {
                let payload = serde_json::to_string(&output).map_err(AppError::from)?;
                let done = store.mark_completed(&item.id, &payload, backend, model).await?;
                if done {
                    summary.completed += 1;
                }
                done
            }
            Err(reason) => {
                let done = store.mark_failed(&item.id, &reason).await?;
                if done {
                    summary.failed += 1;
                }
                done
            }
        };
        if !resolved {
            debug!(item_id = %item.id, "[ResultMapper] Item was no longer claimed");
        }
    }

    debug!(
        completed = summary.completed,
        failed = summary.failed,
        "[ResultMapper] Mapped batch results"
    );
    Ok(summary)
}
