//! Settings Models
//!
//! Application configuration, including the analysis consent flag and backend
//! preferences.

use std::time::Duration;

use chronicle_core::proxy::ProxyConfig;
use chronicle_llm::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};

/// Remote structured-generation provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProvider {
    Gemini,
    OpenAI,
    #[default]
    None,
}

impl RemoteProvider {
    pub fn provider_type(&self) -> Option<ProviderType> {
        match self {
            RemoteProvider::Gemini => Some(ProviderType::Gemini),
            RemoteProvider::OpenAI => Some(ProviderType::OpenAI),
            RemoteProvider::None => None,
        }
    }
}

impl std::str::FromStr for RemoteProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(RemoteProvider::Gemini),
            "openai" => Ok(RemoteProvider::OpenAI),
            "none" | "" => Ok(RemoteProvider::None),
            _ => Err(format!("Unknown remote provider: {}", s)),
        }
    }
}

/// Analysis settings: consent, backend preferences and payload limits.
///
/// Passed explicitly to the orchestrator; callers push changes through
/// `update_settings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisSettings {
    /// User opt-in for sending conversation content to any backend
    pub external_analysis_enabled: bool,
    /// Preferred local CLI tool ("claude", "codex") among capable ones
    pub preferred_cli_tool: Option<String>,
    /// Hard wall-clock limit for one CLI invocation
    pub cli_timeout_secs: u64,
    /// Items claimed per processing cycle
    pub batch_size: usize,
    pub max_messages: usize,
    pub max_message_chars: usize,
    pub max_conversation_chars: usize,
    /// Summaries keep only the first and last message above this count
    pub summary_message_threshold: usize,
    pub remote_provider: RemoteProvider,
    pub remote_model: Option<String>,
    pub remote_base_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub proxy: Option<ProxyConfig>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            external_analysis_enabled: false,
            preferred_cli_tool: None,
            cli_timeout_secs: 300,
            batch_size: 10,
            max_messages: 20,
            max_message_chars: 2000,
            max_conversation_chars: 200_000,
            summary_message_threshold: 4,
            remote_provider: RemoteProvider::None,
            remote_model: None,
            remote_base_url: None,
            remote_api_key: None,
            proxy: None,
        }
    }
}

impl AnalysisSettings {
    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    /// API key from settings, falling back to the provider's environment variable
    pub fn resolved_api_key(&self) -> Option<String> {
        let provider = self.remote_provider.provider_type()?;
        self.remote_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(provider.api_key_env_var())
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
    }

    /// Provider configuration for the remote backend, if one is configured
    /// with credentials.
    pub fn remote_provider_config(&self) -> Option<ProviderConfig> {
        let provider = self.remote_provider.provider_type()?;
        let api_key = self.resolved_api_key()?;
        Some(ProviderConfig {
            provider,
            api_key: Some(api_key),
            base_url: self.remote_base_url.clone(),
            model: self
                .remote_model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
            proxy: self.proxy.clone(),
            ..Default::default()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err("batch_size must be between 1 and 500".to_string());
        }
        if self.cli_timeout_secs == 0 || self.cli_timeout_secs > 3600 {
            return Err("cli_timeout_secs must be between 1 and 3600".to_string());
        }
        if self.max_messages < 2 {
            return Err("max_messages must be at least 2".to_string());
        }
        if self.max_message_chars < 100 {
            return Err("max_message_chars must be at least 100".to_string());
        }
        if self.max_conversation_chars < self.max_message_chars {
            return Err("max_conversation_chars cannot be below max_message_chars".to_string());
        }
        if self.summary_message_threshold < 2 {
            return Err("summary_message_threshold must be at least 2".to_string());
        }
        if let Some(proxy) = &self.proxy {
            proxy.validate().map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Application configuration stored in config.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Enable debug logging
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            analysis: AnalysisSettings::default(),
        }
    }
}

/// Settings update request (partial update).
///
/// For optional string settings an empty string clears the value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub debug_mode: Option<bool>,
    pub external_analysis_enabled: Option<bool>,
    pub preferred_cli_tool: Option<String>,
    pub cli_timeout_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_messages: Option<usize>,
    pub max_message_chars: Option<usize>,
    pub max_conversation_chars: Option<usize>,
    pub summary_message_threshold: Option<usize>,
    pub remote_provider: Option<RemoteProvider>,
    pub remote_model: Option<String>,
    pub remote_base_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub proxy: Option<ProxyConfig>,
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl AppConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(debug) = update.debug_mode {
            self.debug_mode = debug;
        }
        let analysis = &mut self.analysis;
        if let Some(enabled) = update.external_analysis_enabled {
            analysis.external_analysis_enabled = enabled;
        }
        if let Some(tool) = update.preferred_cli_tool {
            analysis.preferred_cli_tool = non_empty(tool);
        }
        if let Some(secs) = update.cli_timeout_secs {
            analysis.cli_timeout_secs = secs;
        }
        if let Some(size) = update.batch_size {
            analysis.batch_size = size;
        }
        if let Some(n) = update.max_messages {
            analysis.max_messages = n;
        }
        if let Some(n) = update.max_message_chars {
            analysis.max_message_chars = n;
        }
        if let Some(n) = update.max_conversation_chars {
            analysis.max_conversation_chars = n;
        }
        if let Some(n) = update.summary_message_threshold {
            analysis.summary_message_threshold = n;
        }
        if let Some(provider) = update.remote_provider {
            analysis.remote_provider = provider;
        }
        if let Some(model) = update.remote_model {
            analysis.remote_model = non_empty(model);
        }
        if let Some(url) = update.remote_base_url {
            analysis.remote_base_url = non_empty(url);
        }
        if let Some(key) = update.remote_api_key {
            analysis.remote_api_key = non_empty(key);
        }
        if let Some(proxy) = update.proxy {
            analysis.proxy = Some(proxy);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.analysis.validate()
    }
}
