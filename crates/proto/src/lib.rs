//! Prompt Relay wire types
//!
//! JSON payloads exchanged on the public HTTP surface and with the
//! OpenAI-compatible chat completion API used by workers.

use serde::{Deserialize, Serialize};

/// Status text reported while a job has not resolved yet
pub const PENDING_STATUS: &str = "Task is currently running.";

/// Status text reported for unknown job ids when lookups are strict
pub const NOT_FOUND_STATUS: &str = "Task not found.";

/// Message returned when the prompt field is missing or empty
pub const PROMPT_REQUIRED: &str = "Prompt is required";

/// Message returned when the prompt exceeds the configured limit
pub const PROMPT_TOO_LONG: &str = "Prompt is too long";

// Public HTTP surface

/// Form body of `POST /ask`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// `202 Accepted` body of `POST /ask`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub task_id: String,
}

/// Error body used for client and backend errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body of `GET /result/{task_id}`, tagged by `state`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatusResponse {
    Pending { status: String },
    Success { result: String },
    Failure { status: String },
    NotFound { status: String },
}

impl TaskStatusResponse {
    pub fn pending() -> Self {
        TaskStatusResponse::Pending {
            status: PENDING_STATUS.to_string(),
        }
    }

    pub fn not_found() -> Self {
        TaskStatusResponse::NotFound {
            status: NOT_FOUND_STATUS.to_string(),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// Chat completion API

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body of `POST {api_base}/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Response body of a successful chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

/// Token accounting reported by the API
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Error envelope returned by the API on non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}
