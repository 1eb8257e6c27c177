//! Job queue and result store
//!
//! The web tier and the workers only talk to these two traits. `Backend`
//! bundles one implementation of each and owns job creation: it mints the id,
//! records the job as PENDING, then hands it to the queue.

pub mod memory;
pub mod redis;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{RelayError, Result};
use crate::job::{Job, JobOutcome, JobRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Status recorded for a job the queue refused
pub const ENQUEUE_FAILED_STATUS: &str = "Failed to enqueue task";

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Channel delivering submitted jobs to workers
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the queue
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Take the oldest job, waiting up to `wait` for one to arrive
    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>>;

    /// Number of jobs waiting
    async fn len(&self) -> Result<usize>;
}

/// Key-value store mapping job id to its current state
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Record a new PENDING job. Never overwrites an existing record.
    async fn create(&self, record: &JobRecord) -> Result<()>;

    /// Look up a job
    async fn get(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Resolve a job. Fails with `AlreadyResolved` if it is already terminal.
    async fn complete(&self, job: &Job, outcome: JobOutcome) -> Result<JobRecord>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;
}

/// Queue and store handles shared by handlers and workers
#[derive(Clone)]
pub struct Backend {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
}

impl Backend {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ResultStore>) -> Self {
        Self { queue, store }
    }

    /// In-process queue and store
    pub fn in_memory() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        Self::new(backend.clone(), backend)
    }

    /// Connect to the backend named by the configuration
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        match config.kind {
            BackendKind::Memory => {
                info!("Using in-memory job queue and result store");
                let backend = Arc::new(MemoryBackend::with_ttl(config.result_ttl()));
                Ok(Self::new(backend.clone(), backend))
            }
            BackendKind::Redis => {
                let url = config
                    .url
                    .as_deref()
                    .ok_or_else(|| RelayError::config("redis backend requires a url"))?;
                let backend = Arc::new(RedisBackend::connect(url, config).await?);
                info!("Connected to redis job queue '{}'", config.queue_key);
                Ok(Self::new(backend.clone(), backend))
            }
        }
    }

    /// Create a PENDING job for `prompt` and enqueue it. A job the queue
    /// refuses is resolved as FAILURE so it does not stay PENDING.
    pub async fn submit(&self, prompt: String) -> Result<Job> {
        let job = Job::new(prompt);

        self.store.create(&JobRecord::pending(&job)).await?;
        if let Err(e) = self.queue.enqueue(&job).await {
            let outcome = JobOutcome::Failure(ENQUEUE_FAILED_STATUS.to_string());
            if let Err(store_err) = self.store.complete(&job, outcome).await {
                error!("Job {} left PENDING after enqueue failure: {}", job.id, store_err);
            }
            return Err(e);
        }

        debug!("Enqueued job {}", job.id);
        Ok(job)
    }

    /// Current record of a job, if the store knows it
    pub async fn status(&self, id: &str) -> Result<Option<JobRecord>> {
        self.store.get(id).await
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }
}
