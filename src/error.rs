use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tether supervisor
#[derive(Debug, Error)]
pub enum TetherError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Invalid memory size '{0}': {1}")]
    InvalidMemorySize(String, String),

    #[error("Duplicate application name: {0}")]
    DuplicateApp(String),

    // Runtime errors
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    LogOpen(#[from] LogOpenError),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Supervisor task failed: {0}")]
    Internal(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a single launch attempt can fail
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Executable not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Bad working directory {path}: {reason}")]
    BadWorkingDirectory { path: PathBuf, reason: String },

    #[error("Failed to spawn {0}: {1}")]
    Spawn(PathBuf, std::io::Error),
}

/// A log target could not be opened, so the launch is aborted
#[derive(Debug, Error)]
#[error("Failed to open log file {path}: {source}")]
pub struct LogOpenError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
