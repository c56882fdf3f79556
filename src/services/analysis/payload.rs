//! Payload Preparation
//!
//! Turns stored conversations into compact, redacted, size-bounded payloads.
//! Redaction always runs before truncation so a cut can never expose half
//! of a secret.

use chronicle_core::{
    AnalysisType, Conversation, ConversationMessage, ConversationPayload, PayloadMessage,
    QueueItem,
};
use tracing::debug;

use super::redaction::redact;
use super::store::ConversationStore;
use crate::models::settings::AnalysisSettings;
use crate::utils::error::AppResult;

/// Appended to any message body that was cut
pub const TRUNCATION_MARKER: &str = "… [truncated]";

/// Messages kept from the end of a conversation when halving for the budget
const BUDGET_TAIL_MESSAGES: usize = 9;

/// Size limits applied while preparing payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    pub max_messages: usize,
    pub max_message_chars: usize,
    pub max_conversation_chars: usize,
    pub summary_message_threshold: usize,
}

impl From<&AnalysisSettings> for PayloadLimits {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            max_messages: settings.max_messages,
            max_message_chars: settings.max_message_chars,
            max_conversation_chars: settings.max_conversation_chars,
            summary_message_threshold: settings.summary_message_threshold,
        }
    }
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self::from(&AnalysisSettings::default())
    }
}

/// When message-bounded truncation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Always bound messages (local CLI backends)
    Always,
    /// Keep full content unless it exceeds the per-conversation ceiling; the
    /// budget accumulator truncates further on overflow (remote backends)
    OnOverflow,
}

/// An item that could not be processed, with the reason recorded on failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: String,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            reason: reason.into(),
        }
    }
}

/// Payloads ready for a backend plus the items that could not be prepared
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub payloads: Vec<ConversationPayload>,
    pub failures: Vec<ItemFailure>,
}

// ============================================================================
// Truncation policies
// ============================================================================

fn truncate_chars(content: &str, max_chars: usize) -> (String, bool) {
    match content.char_indices().nth(max_chars) {
        None => (content.to_string(), false),
        Some((byte_idx, _)) => (format!("{}{}", &content[..byte_idx], TRUNCATION_MARKER), true),
    }
}

/// Keep at most `max_messages` (first ⌈N/2⌉ and last ⌊N/2⌋), each capped at
/// `max_chars`. Returns the kept messages and whether anything was cut.
pub fn bound_messages(
    messages: &[PayloadMessage],
    max_messages: usize,
    max_chars: usize,
) -> (Vec<PayloadMessage>, bool) {
    let mut truncated = false;

    let selected: Vec<&PayloadMessage> = if messages.len() > max_messages {
        truncated = true;
        let head = max_messages.div_ceil(2);
        let tail = max_messages / 2;
        messages[..head]
            .iter()
            .chain(messages[messages.len() - tail..].iter())
            .collect()
    } else {
        messages.iter().collect()
    };

    let bounded = selected
        .into_iter()
        .map(|m| {
            let (content, cut) = truncate_chars(&m.content, max_chars);
            truncated |= cut;
            PayloadMessage {
                id: m.id.clone(),
                role: m.role.clone(),
                content,
            }
        })
        .collect();

    (bounded, truncated)
}

/// Keep only the first and last message once a conversation exceeds `threshold`
pub fn first_and_last(messages: &[PayloadMessage], threshold: usize) -> (Vec<PayloadMessage>, bool) {
    if messages.len() <= threshold || messages.len() <= 2 {
        return (messages.to_vec(), false);
    }
    let kept = vec![messages[0].clone(), messages[messages.len() - 1].clone()];
    (kept, true)
}

fn head_and_tail(messages: &[PayloadMessage], tail: usize) -> (Vec<PayloadMessage>, bool) {
    if messages.len() <= tail + 1 {
        return (messages.to_vec(), false);
    }
    let mut kept = Vec::with_capacity(tail + 1);
    kept.push(messages[0].clone());
    kept.extend_from_slice(&messages[messages.len() - tail..]);
    (kept, true)
}

/// Drop all bodies, keeping only title and counts
pub fn to_metadata_only(payload: &mut ConversationPayload) {
    payload.messages.clear();
    payload.metadata_only = true;
    payload.was_truncated = true;
    payload.refresh_estimate();
}

/// Build the payload for one queue item.
///
/// `item_id` becomes the payload id so results can be correlated back.
pub fn build_payload(
    item_id: &str,
    conversation: &Conversation,
    messages: &[ConversationMessage],
    analysis_type: AnalysisType,
    limits: &PayloadLimits,
    mode: TruncationMode,
) -> ConversationPayload {
    let redacted: Vec<PayloadMessage> = messages
        .iter()
        .map(|m| PayloadMessage {
            id: m.id.clone(),
            role: m.role.clone(),
            content: redact(&m.content),
        })
        .collect();

    let mut was_truncated = false;
    let mut kept = redacted;

    if analysis_type == AnalysisType::Summarization {
        let (summary, cut) = first_and_last(&kept, limits.summary_message_threshold);
        kept = summary;
        was_truncated |= cut;
    }

    let mut payload = ConversationPayload {
        id: item_id.to_string(),
        title: redact(&conversation.title),
        messages: kept,
        message_count: messages.len(),
        estimated_character_count: 0,
        was_truncated,
        metadata_only: false,
    };
    payload.refresh_estimate();

    let must_bound = match mode {
        TruncationMode::Always => true,
        TruncationMode::OnOverflow => payload.estimated_character_count > limits.max_conversation_chars,
    };
    if must_bound {
        apply_message_bound(&mut payload, limits);
    }

    if payload.estimated_character_count > limits.max_conversation_chars {
        debug!(
            item_id,
            chars = payload.estimated_character_count,
            "Conversation exceeds ceiling after truncation, sending metadata only"
        );
        to_metadata_only(&mut payload);
    }

    payload
}

fn apply_message_bound(payload: &mut ConversationPayload, limits: &PayloadLimits) {
    let (bounded, cut) = bound_messages(&payload.messages, limits.max_messages, limits.max_message_chars);
    payload.messages = bounded;
    payload.was_truncated |= cut;
    payload.refresh_estimate();
}

/// Fetch and prepare payloads for a group of items of the same analysis type.
///
/// A missing conversation fails only its own item.
pub async fn prepare(
    store: &dyn ConversationStore,
    items: &[QueueItem],
    analysis_type: AnalysisType,
    limits: &PayloadLimits,
    mode: TruncationMode,
) -> AppResult<PreparedBatch> {
    let mut batch = PreparedBatch::default();

    for item in items {
        let Some(conversation) = store.fetch(&item.subject_id).await? else {
            batch.failures.push(ItemFailure::new(
                &item.id,
                format!("conversation not found: {}", item.subject_id),
            ));
            continue;
        };
        let messages = store.fetch_messages(&item.subject_id).await?;
        batch.payloads.push(build_payload(
            &item.id,
            &conversation,
            &messages,
            analysis_type,
            limits,
            mode,
        ));
    }

    Ok(batch)
}

// ============================================================================
// Remote character budget
// ============================================================================

/// Result of fitting payloads into a request budget
#[derive(Debug, Default)]
pub struct BudgetOutcome {
    pub included: Vec<ConversationPayload>,
    /// Ids of payloads excluded because they could not be made to fit
    pub dropped: Vec<String>,
}

/// Fit payloads, in order, into `budget_tokens` (estimated as chars / 4).
///
/// An overflowing payload is message-bounded, then cut to the first message
/// plus the last nine, then dropped.
pub fn apply_budget(
    payloads: Vec<ConversationPayload>,
    budget_tokens: usize,
    limits: &PayloadLimits,
) -> BudgetOutcome {
    let mut outcome = BudgetOutcome::default();
    let mut used = 0usize;

    for mut payload in payloads {
        let fits = |p: &ConversationPayload, used: usize| used + p.estimated_tokens() <= budget_tokens;

        if !fits(&payload, used) {
            apply_message_bound(&mut payload, limits);
        }
        if !fits(&payload, used) {
            let (halved, cut) = head_and_tail(&payload.messages, BUDGET_TAIL_MESSAGES);
            payload.messages = halved;
            payload.was_truncated |= cut;
            payload.refresh_estimate();
        }
        if !fits(&payload, used) {
            debug!(item_id = %payload.id, tokens = payload.estimated_tokens(), "Dropping payload over budget");
            outcome.dropped.push(payload.id);
            continue;
        }

        used += payload.estimated_tokens();
        outcome.included.push(payload);
    }

    outcome
}
