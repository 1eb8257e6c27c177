//! Prompt Relay Worker
//!
//! Pulls submitted prompts from the shared queue, forwards each one to the
//! external inference API and records the outcome in the result store.

pub mod inference;
pub mod processor;

pub use inference::{InferenceClient, InferenceError, MockInferenceClient, OpenAiClient};
pub use processor::{JobProcessor, WorkerPool};
