//! Data Models
//!
//! Contains the configuration data structures used throughout the application.

pub mod settings;

pub use settings::*;
