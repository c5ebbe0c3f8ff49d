//! Error types for the harness

use std::time::Duration;

use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while orchestrating a run
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Target startup took longer than {} ms", .0.as_millis())]
    ReadinessTimeout(Duration),

    #[error("Target exited before becoming ready: {0}")]
    UnexpectedExit(String),

    #[error("Test execution error: {0}")]
    TestExecution(String),

    #[error("Collection runner '{0}' not found in PATH (for newman: npm install -g newman)")]
    RunnerNotFound(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
