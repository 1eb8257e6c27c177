//! Common error types for Prompt Relay
//!
//! This module defines the error type shared by the gateway and workers.
//! Every variant maps to an HTTP status so the gateway can surface it directly.

use thiserror::Error;

/// Main error type for Prompt Relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client input rejected at submission time
    #[error("Validation error: {0}")]
    Validation(String),

    /// Attempt to change the state of a job that already resolved
    #[error("Job already resolved: {0}")]
    AlreadyResolved(String),

    /// Queue or result store unavailable
    #[error("Backend error: {0}")]
    Backend(String),

    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Inference API failures
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for RelayError {
    fn from(err: ::config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl RelayError {
    /// HTTP status code the gateway answers with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::AlreadyResolved(_) => 409,
            RelayError::Backend(_) | RelayError::Redis(_) => 503,
            RelayError::ExternalService(_) => 502,
            RelayError::Timeout(_) => 504,
            RelayError::Config(_) | RelayError::Serialization(_) | RelayError::Io(_) => 500,
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }

    /// Create an already resolved error
    pub fn already_resolved(msg: impl Into<String>) -> Self {
        RelayError::AlreadyResolved(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        RelayError::Backend(msg.into())
    }

    /// Create an external service error
    pub fn external(msg: impl Into<String>) -> Self {
        RelayError::ExternalService(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        RelayError::Timeout(msg.into())
    }
}

/// Result type alias for Prompt Relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::validation("Prompt is required").http_status(), 400);
        assert_eq!(RelayError::already_resolved("abc").http_status(), 409);
        assert_eq!(RelayError::backend("down").http_status(), 503);
        assert_eq!(RelayError::config("boom").http_status(), 500);

        assert!(RelayError::validation("x").is_client_error());
        assert!(!RelayError::backend("x").is_client_error());
    }
}
