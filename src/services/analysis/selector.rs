//! Backend Selector
//!
//! Picks the single backend for a processing cycle: nothing without consent,
//! then a capable local CLI tool, then a configured remote API.

use std::sync::{Arc, Mutex};

use chronicle_llm::{ProviderConfig, StructuredProvider};
use tracing::{debug, info, warn};

use super::backend::{AnalysisBackend, CliBackend, RemoteApiBackend};
use super::cli_tools::{CliToolProbe, DetectedTool};
use super::subprocess::SubprocessExecutor;
use crate::models::settings::AnalysisSettings;

/// Builds a remote provider from its configuration
pub type ProviderFactory = Arc<dyn Fn(ProviderConfig) -> Arc<dyn StructuredProvider> + Send + Sync>;

pub struct BackendSelector {
    probe: Arc<dyn CliToolProbe>,
    provider_factory: ProviderFactory,
    detected: Mutex<Option<Vec<DetectedTool>>>,
}

impl BackendSelector {
    pub fn new(probe: Arc<dyn CliToolProbe>) -> Self {
        Self {
            probe,
            provider_factory: Arc::new(chronicle_llm::create_provider),
            detected: Mutex::new(None),
        }
    }

    /// Replace how remote providers are constructed
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = factory;
        self
    }

    /// Re-run tool detection on the blocking pool; filesystem probing never
    /// runs on a runtime worker. A failed probe task keeps the previous cache.
    pub async fn refresh_tools(&self) {
        let probe = Arc::clone(&self.probe);
        let tools = match tokio::task::spawn_blocking(move || probe.detect()).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "[BackendSelector] Tool detection task failed");
                return;
            }
        };
        debug!(
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "[BackendSelector] Detected CLI tools"
        );
        *self.lock_detected() = Some(tools);
    }

    /// Detected tools, probing once if the cache is empty
    pub fn detected_tools(&self) -> Vec<DetectedTool> {
        let mut cache = self.lock_detected();
        cache.get_or_insert_with(|| self.probe.detect()).clone()
    }

    /// Select the backend for a new cycle, refreshing detected tools first.
    ///
    /// Consent is checked before anything is probed: without it this returns
    /// `None` and touches neither the filesystem nor the tool cache.
    pub async fn select_for_cycle(
        &self,
        settings: &AnalysisSettings,
    ) -> Option<Arc<dyn AnalysisBackend>> {
        if !settings.external_analysis_enabled {
            debug!("[BackendSelector] External analysis disabled");
            return None;
        }
        self.refresh_tools().await;
        self.select(settings)
    }

    fn lock_detected(&self) -> std::sync::MutexGuard<'_, Option<Vec<DetectedTool>>> {
        self.detected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Select the backend for this cycle, or `None` when nothing may or can run.
    pub fn select(&self, settings: &AnalysisSettings) -> Option<Arc<dyn AnalysisBackend>> {
        if !settings.external_analysis_enabled {
            debug!("[BackendSelector] External analysis disabled");
            return None;
        }

        if let Some(tool) = self.pick_cli_tool(settings) {
            info!(tool = %tool.name, path = %tool.path.display(), "[BackendSelector] Using local CLI");
            let executor = SubprocessExecutor::new(settings.cli_timeout()).with_working_dir(std::env::temp_dir());
            return Some(Arc::new(CliBackend::new(tool, executor)));
        }

        if let Some(config) = settings.remote_provider_config() {
            info!(provider = %config.provider, model = %config.model, "[BackendSelector] Using remote API");
            let provider = (self.provider_factory)(config);
            return Some(Arc::new(RemoteApiBackend::new(provider)));
        }

        None
    }

    fn pick_cli_tool(&self, settings: &AnalysisSettings) -> Option<DetectedTool> {
        let capable: Vec<DetectedTool> = self
            .detected_tools()
            .into_iter()
            .filter(|t| t.capabilities.is_capable())
            .collect();

        if let Some(preferred) = settings.preferred_cli_tool.as_deref() {
            if let Some(tool) = capable.iter().find(|t| t.name == preferred) {
                return Some(tool.clone());
            }
        }
        capable.into_iter().next()
    }
}

/// Why no backend was selected, for the error surfaced to the user
pub fn unavailable_reason(settings: &AnalysisSettings) -> &'static str {
    if !settings.external_analysis_enabled {
        "external analysis is disabled"
    } else {
        "no capable CLI tool found and no remote API configured"
    }
}
