//! External inference API
//!
//! Workers only see the `InferenceClient` trait: one prompt in, one text out.
//! `OpenAiClient` talks to an OpenAI-compatible chat completion endpoint;
//! `MockInferenceClient` scripts replies for tests.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use relay_common::RelayError;
use std::time::Duration;
use thiserror::Error;

pub use mock::MockInferenceClient;
pub use openai::OpenAiClient;

/// Failures of a single inference call
#[derive(Debug, Error)]
pub enum InferenceError {
    /// No credential configured
    #[error("Authentication failed: no API key configured (set OPENAI_API_KEY)")]
    MissingCredential,

    /// The API rejected the credential
    #[error("Authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    /// Any other non-success response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request exceeded the configured job timeout
    #[error("Inference request timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure before a response arrived
    #[error("Network error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The response body could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl InferenceError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => InferenceError::Authentication { status, message },
            _ => InferenceError::Api { status, message },
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            InferenceError::MissingCredential | InferenceError::Authentication { .. }
        )
    }
}

impl From<InferenceError> for RelayError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Timeout(_) => RelayError::timeout(err.to_string()),
            other => RelayError::external(other.to_string()),
        }
    }
}

/// Something that turns a prompt into a reply
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, InferenceError>;
}
