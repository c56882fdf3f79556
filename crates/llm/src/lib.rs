//! Chronicle LLM
//!
//! Remote structured-generation providers used as the fallback analysis backend:
//! - Google Gemini (`generateContent` with a response schema)
//! - OpenAI and compatible endpoints (`response_format: json_schema`)
//!
//! Also includes the HTTP client factory and the provider error type.

pub mod gemini;
pub mod http_client;
pub mod openai;
pub mod provider;
pub mod types;

// Re-export main types
pub use gemini::GeminiProvider;
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::{missing_api_key_error, parse_http_error, StructuredProvider};
pub use types::*;

use std::sync::Arc;

/// Create a provider for the given configuration
pub fn create_provider(config: ProviderConfig) -> Arc<dyn StructuredProvider> {
    match config.provider {
        ProviderType::Gemini => Arc::new(GeminiProvider::new(config)),
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)),
    }
}
