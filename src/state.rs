//! Application State
//!
//! Shared services: database, configuration and the analysis orchestrator.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::settings::{AppConfig, SettingsUpdate};
use crate::services::analysis::{AnalysisOrchestrator, CliToolProbe, PathProbe};
use crate::storage::{ConfigService, Database};
use crate::utils::error::{AppError, AppResult};

pub struct AppState {
    /// SQLite database with connection pool
    database: Arc<Database>,
    /// Configuration service for app settings
    config: Arc<RwLock<ConfigService>>,
    orchestrator: Arc<AnalysisOrchestrator>,
}

impl AppState {
    /// Open the default database and config and build the orchestrator
    pub fn initialize() -> AppResult<Self> {
        Self::from_parts(Database::new()?, ConfigService::new()?, Arc::new(PathProbe::new()))
    }

    pub fn from_parts(
        database: Database,
        config: ConfigService,
        probe: Arc<dyn CliToolProbe>,
    ) -> AppResult<Self> {
        let database = Arc::new(database);
        let orchestrator = AnalysisOrchestrator::new(
            database.clone(),
            database.clone(),
            probe,
            config.analysis_settings(),
        );
        Ok(Self {
            database,
            config: Arc::new(RwLock::new(config)),
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn orchestrator(&self) -> &Arc<AnalysisOrchestrator> {
        &self.orchestrator
    }

    /// Check if database is healthy
    pub fn is_database_healthy(&self) -> bool {
        self.database.is_healthy()
    }

    /// Get the current configuration
    pub async fn get_config(&self) -> AppConfig {
        self.config.read().await.get_config().clone()
    }

    /// Update and persist the configuration, then hand the new analysis
    /// settings to the orchestrator.
    pub async fn update_config(&self, update: SettingsUpdate) -> AppResult<AppConfig> {
        let updated = self.config.write().await.update_config(update)?;
        self.orchestrator
            .update_settings(updated.analysis.clone())
            .await
            .map_err(|e| AppError::validation(e.to_string()))?;
        Ok(updated)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("database", &self.database)
            .field("owner_id", &self.orchestrator.owner_id())
            .finish()
    }
}
