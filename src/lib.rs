//! Chronicle Desktop - Rust Backend Library
//!
//! Backend of the Chronicle desktop application, which aggregates AI assistant
//! conversation logs. This library includes:
//! - The conversation analysis queue and its orchestrator
//! - Storage layer (SQLite, JSON config)
//! - Data models and utilities

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use models::settings::{AnalysisSettings, AppConfig, RemoteProvider, SettingsUpdate};
pub use services::analysis::{
    AnalysisError, AnalysisOrchestrator, AnalysisProgress, AnalysisResult, CycleSummary,
    ScanSummary,
};
pub use state::AppState;
pub use storage::{ConfigService, Database};
pub use utils::error::{AppError, AppResult};
