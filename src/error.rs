//! Error types for the wireless microphone

use std::fmt;

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One rejected entry of the capture fallback list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigAttempt {
    pub description: String,
    pub reason: String,
}

impl fmt::Display for ConfigAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.reason)
    }
}

/// Capture subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Every fallback configuration was rejected. Terminal for the `start`
    /// call that produced it.
    #[error("No usable capture configuration: {}", format_attempts(.0))]
    Configuration(Vec<ConfigAttempt>),

    /// A read failed while capturing. A fresh `start` is allowed afterwards.
    #[error("Capture read failed: {0}")]
    TransientIo(String),

    #[error("Capture backend error: {0}")]
    Backend(String),
}

fn format_attempts(attempts: &[ConfigAttempt]) -> String {
    if attempts.is_empty() {
        return "no configurations to try".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Service advertisement and handshake listener errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Service registration failed: {0}")]
    Registration(String),

    #[error("Failed to bind handshake listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Handshake listener failed: {0}")]
    Listener(#[source] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
