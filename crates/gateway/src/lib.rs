//! Prompt Relay Gateway
//!
//! Stateless web tier: accepts prompts, enqueues them, and answers status polls
//! from the shared result store.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, serve, AppState};
