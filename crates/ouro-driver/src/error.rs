//! Error types for the RLM driver.

use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can unwind out of the driver.
///
/// Each variant maps to exactly one process exit code; see [`DriverError::exit_code`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// Malformed caller input (bad arguments, non-object usage payload).
    #[error("Usage error: {0}")]
    Usage(String),

    /// Invalid environment or configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or HTTP failure talking to the model endpoint.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// The provider's model catalog was unusable.
    #[error("Model error: {0}")]
    Model(String),

    /// Budget exceeded, call limit exhausted, or an unknown mid-turn failure.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The final result could not be persisted.
    #[error("Output error: {0}")]
    Output(String),

    /// The run was cancelled from outside.
    #[error("Interrupted")]
    Interrupted,
}

impl DriverError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::Usage(_) => 2,
            DriverError::Config(_) => 3,
            DriverError::Proxy(_) => 4,
            DriverError::Model(_) => 5,
            DriverError::Runtime(_) => 6,
            DriverError::Output(_) => 7,
            DriverError::Interrupted => 130,
        }
    }

    /// The same error with every given secret stripped from its message.
    pub fn redacted(self, secrets: &[&str]) -> DriverError {
        match self {
            DriverError::Usage(m) => DriverError::Usage(redact_secrets(&m, secrets)),
            DriverError::Config(m) => DriverError::Config(redact_secrets(&m, secrets)),
            DriverError::Proxy(m) => DriverError::Proxy(redact_secrets(&m, secrets)),
            DriverError::Model(m) => DriverError::Model(redact_secrets(&m, secrets)),
            DriverError::Runtime(m) => DriverError::Runtime(redact_secrets(&m, secrets)),
            DriverError::Output(m) => DriverError::Output(redact_secrets(&m, secrets)),
            DriverError::Interrupted => DriverError::Interrupted,
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(e: reqwest::Error) -> Self {
        DriverError::Proxy(e.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Runtime(e.to_string())
    }
}

impl From<ouro_events::SinkError> for DriverError {
    fn from(e: ouro_events::SinkError) -> Self {
        DriverError::Runtime(format!("event sink: {e}"))
    }
}

/// Strip secrets from a message before it crosses the process boundary.
///
/// Every occurrence of a secret is replaced, not just the first; empty
/// secrets are skipped so a blank key cannot corrupt the message.
pub fn redact_secrets(message: &str, secrets: &[&str]) -> String {
    let mut out = message.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = out.replace(secret, "[REDACTED]");
        }
    }
    out
}
