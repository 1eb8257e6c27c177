//! Scripted inference client for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{InferenceClient, InferenceError};

type Responder = Box<dyn Fn(&str) -> Result<String, InferenceError> + Send + Sync>;

/// A scripted inference client for tests.
pub struct MockInferenceClient {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockInferenceClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, InferenceError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Answer with the prompt itself.
    pub fn echo() -> Self {
        Self::new(|prompt| Ok(prompt.to_string()))
    }

    /// Always fail as if the API rejected the credential.
    pub fn rejecting_credentials() -> Self {
        Self::new(|_| {
            Err(InferenceError::from_status(
                401,
                "Incorrect API key provided",
            ))
        })
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completed calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn complete(&self, prompt: &str) -> Result<String, InferenceError> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(prompt)
    }
}
