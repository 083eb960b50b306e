//! Error types for the harness
//!
//! Failures carry enough context (captured backend output, last HTTP
//! status and payload) to diagnose a broken test run without re-running.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Instance Errors ===
    #[error("Backend failed to start: {message}\n--- captured output ---\n{diagnostics}")]
    StartupFailed { message: String, diagnostics: String },

    // === Timeout Errors ===
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    // === HTTP Errors ===
    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // === Directory Errors ===
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    // === Stream Errors ===
    #[error("Stream protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // === Scenario Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario assertion failed: {0}")]
    ScenarioAssertion(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a timeout error for a named operation
    pub fn timeout(operation: &str, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            timeout,
        }
    }

    /// Create a startup failure with captured diagnostic output
    pub fn startup_failed(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::StartupFailed {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Create a not-found error for a directory entity
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
