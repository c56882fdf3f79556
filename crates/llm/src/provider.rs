//! Structured Provider Trait
//!
//! Common interface for remote structured-generation providers: one POST with a
//! prompt and a JSON response schema, returning the JSON text the model produced.

use async_trait::async_trait;

use super::types::{LlmError, LlmResult, ProviderConfig, StructuredResponse};

/// Trait that all remote providers must implement.
#[async_trait]
pub trait StructuredProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Returns the model's context window size in tokens.
    ///
    /// Used to size the per-request character budget. Default: 128,000.
    fn context_window(&self) -> u32 {
        128_000
    }

    /// Generate a response constrained to `schema`.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> LlmResult<StructuredResponse>;

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Phrases providers use in 400 bodies when the prompt is too long
const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "exceeds the maximum number of tokens",
    "input token count",
    "request payload size exceeds",
    "too many tokens",
];

fn mentions_context_length(body: &str) -> bool {
    let lower = body.to_lowercase();
    CONTEXT_LENGTH_MARKERS.iter().any(|m| lower.contains(m))
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        413 => LlmError::ContextLengthExceeded {
            message: format!("{}: request entity too large", provider),
            max_tokens: None,
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 if mentions_context_length(body) => LlmError::ContextLengthExceeded {
            message: body.to_string(),
            max_tokens: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
