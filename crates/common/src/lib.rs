//! Prompt Relay common library
//!
//! This crate contains the job model, the queue/store abstraction and the
//! configuration, errors and metrics shared by the gateway and the workers.

pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;

// Re-export commonly used types
pub use self::backend::{Backend, JobQueue, ResultStore};
pub use self::config::{RelayConfig, Role};
pub use self::error::{RelayError, Result};
pub use self::job::{Job, JobId, JobOutcome, JobRecord, JobState};
pub use self::metrics::{MetricsRegistry, METRICS};
