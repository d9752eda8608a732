//! Error types for the scan arbiter.

use thiserror::Error;

/// Errors raised by the arbiter's adapters and configuration loader.
///
/// None of these cross the public [`Coordinator`](crate::Coordinator)
/// operations; the coordinator logs them and degrades instead.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP request to the Hub failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Hub returned a non-success status
    #[error("Hub API error: {status} - {message}")]
    HubApi { status: u16, message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration YAML could not be parsed
    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The dispatcher queue no longer accepts jobs
    #[error("Scan job queue is closed")]
    QueueClosed,
}

/// Result alias used throughout the crate.
pub type Result<T, E = ArbiterError> = std::result::Result<T, E>;
