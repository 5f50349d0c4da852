//! Gatekeeper error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading settings or managing grants
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A settings file exists but could not be parsed
    #[error("Invalid settings file {}: {source}", path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A grant cycle with this id is still running
    #[error("Cycle already active: {0}")]
    CycleActive(String),
}

impl GatekeeperError {
    /// Create a configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        GatekeeperError::InvalidConfig(msg.into())
    }
}

/// Result type alias for gatekeeper operations
pub type GatekeeperResult<T> = Result<T, GatekeeperError>;
