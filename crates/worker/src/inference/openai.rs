//! Chat completion client for OpenAI-compatible APIs

use async_trait::async_trait;
use relay_common::config::InferenceConfig;
use relay_proto::{
    ApiErrorEnvelope, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
};
use std::time::Duration;
use tracing::debug;

use super::{InferenceClient, InferenceError};

/// Client for an OpenAI-compatible chat completion API.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiClient {
    /// Build a client; the job timeout bounds every request.
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let timeout = Duration::from_secs(config.job_timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InferenceError::Transport)?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    /// First choice, trimmed. No choices yields an empty reply.
    fn extract_text(response: ChatCompletionResponse) -> String {
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default()
    }

    /// Prefer the API's own error message over the raw body.
    fn error_message(body: &str) -> String {
        match serde_json::from_str::<ApiErrorEnvelope>(body) {
            Ok(envelope) => match envelope.error.kind {
                Some(kind) => format!("{} ({})", envelope.error.message, kind),
                None => envelope.error.message,
            },
            Err(_) if body.trim().is_empty() => "empty response body".to_string(),
            Err(_) => body.trim().to_string(),
        }
    }

    fn classify(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout(self.timeout)
        } else {
            InferenceError::Transport(err)
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, InferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(InferenceError::MissingCredential)?;

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.temperature,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(InferenceError::from_status(status, Self::error_message(&text)));
        }

        let text = resp.text().await.map_err(|e| self.classify(e))?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        if let Some(usage) = parsed.usage {
            debug!(
                "Completion used {} prompt + {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(Self::extract_text(parsed))
    }
}
