//! Job model
//!
//! A job is one submitted prompt tracked by an id through
//! `PENDING -> SUCCESS | FAILURE`. Transitions are one-way.

use crate::error::{RelayError, Result};
use relay_proto::TaskStatusResponse;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opaque job identifier
pub type JobId = String;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        match self {
            JobState::Pending => false,
            JobState::Success | JobState::Failure => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work as carried by the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub created_at: u64,
}

impl Job {
    /// Mint a job with a fresh id. Only the queueing layer calls this.
    pub(crate) fn new(prompt: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt,
            created_at: unix_now(),
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success(String),
    Failure(String),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Success(_) => JobState::Success,
            JobOutcome::Failure(_) => JobState::Failure,
        }
    }
}

/// A job as held by the result store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub prompt: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
}

impl JobRecord {
    /// Record for a freshly submitted job
    pub fn pending(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            prompt: job.prompt.clone(),
            state: JobState::Pending,
            result: None,
            error: None,
            created_at: job.created_at,
            finished_at: None,
        }
    }

    /// Apply a terminal outcome. Fails if the record already resolved.
    pub fn resolve(&mut self, outcome: JobOutcome) -> Result<()> {
        if self.state.is_terminal() {
            return Err(RelayError::already_resolved(format!(
                "{} is {}",
                self.id, self.state
            )));
        }

        self.state = outcome.state();
        match outcome {
            JobOutcome::Success(result) => self.result = Some(result),
            JobOutcome::Failure(error) => self.error = Some(error),
        }
        self.finished_at = Some(unix_now());
        Ok(())
    }

    /// Time of the last state change, unix seconds
    pub fn updated_at(&self) -> u64 {
        self.finished_at.unwrap_or(self.created_at)
    }

    /// Whether `ttl` has passed since the last state change
    pub fn is_expired(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.updated_at()) >= ttl.as_secs()
    }

    /// Public view of this record
    pub fn to_status(&self) -> TaskStatusResponse {
        match self.state {
            JobState::Pending => TaskStatusResponse::pending(),
            JobState::Success => TaskStatusResponse::Success {
                result: self.result.clone().unwrap_or_default(),
            },
            JobState::Failure => TaskStatusResponse::Failure {
                status: self.error.clone().unwrap_or_default(),
            },
        }
    }
}

/// Current time in unix seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
