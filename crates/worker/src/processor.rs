//! Job execution
//!
//! `JobProcessor` runs one job: call the inference API, record the outcome.
//! `WorkerPool` drives `concurrency` independent pull loops over the shared
//! queue. Inference failures become FAILURE records. A dequeued job's outcome
//! is written until the store accepts it, so the job cannot be left PENDING.
//! Nothing here ends a loop except shutdown.

use crate::inference::InferenceClient;
use relay_common::config::RelayConfig;
use relay_common::error::{RelayError, Result};
use relay_common::metrics::WorkerMetrics;
use relay_common::{Backend, Job, JobOutcome, JobRecord, JobState, METRICS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Pause between attempts to store an outcome, unless configured
const DEFAULT_STORE_BACKOFF: Duration = Duration::from_millis(500);

/// Executes jobs against the inference API
pub struct JobProcessor {
    backend: Backend,
    client: Arc<dyn InferenceClient>,
    store_backoff: Duration,
    metrics: WorkerMetrics,
}

impl JobProcessor {
    pub fn new(backend: Backend, client: Arc<dyn InferenceClient>) -> Self {
        Self {
            backend,
            client,
            store_backoff: DEFAULT_STORE_BACKOFF,
            metrics: METRICS.worker.clone(),
        }
    }

    /// Pause between attempts to store an outcome
    pub fn with_store_backoff(mut self, backoff: Duration) -> Self {
        self.store_backoff = backoff;
        self
    }

    #[cfg(test)]
    fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run one job to completion and store its terminal state
    pub async fn process(&self, job: Job) -> Result<JobRecord> {
        self.metrics.active_jobs.inc();
        let start = Instant::now();

        let outcome = match self.client.complete(&job.prompt).await {
            Ok(text) => JobOutcome::Success(text),
            Err(e) => {
                warn!("Job {} failed: {}", job.id, e);
                JobOutcome::Failure(e.to_string())
            }
        };

        let duration = start.elapsed();
        self.metrics.job_duration.observe(duration.as_secs_f64());
        self.metrics.active_jobs.dec();

        let record = self.store_outcome(&job, outcome).await?;
        match record.state {
            JobState::Success => self.metrics.jobs_succeeded.inc(),
            JobState::Failure => self.metrics.jobs_failed.inc(),
            JobState::Pending => {}
        }
        info!(
            "Job {} resolved as {} in {:.2}s",
            record.id,
            record.state,
            duration.as_secs_f64()
        );
        Ok(record)
    }

    /// Write a terminal state, retrying backend errors until the store
    /// accepts it. `AlreadyResolved` is final.
    async fn store_outcome(&self, job: &Job, outcome: JobOutcome) -> Result<JobRecord> {
        let mut attempt: u32 = 1;
        loop {
            match self.backend.store().complete(job, outcome.clone()).await {
                Ok(record) => return Ok(record),
                Err(e @ RelayError::AlreadyResolved(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        "Storing outcome of job {} failed (attempt {}): {}",
                        job.id, attempt, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.store_backoff).await;
                }
            }
        }
    }

    /// Take one job from the queue, waiting up to `wait`, and run it
    pub async fn process_next(&self, wait: Duration) -> Result<Option<JobRecord>> {
        match self.backend.queue().dequeue(wait).await? {
            Some(job) => {
                debug!("Dequeued job {}", job.id);
                self.process(job).await.map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Set of pull loops sharing one processor
pub struct WorkerPool {
    processor: Arc<JobProcessor>,
    concurrency: usize,
    poll_timeout: Duration,
    poll_backoff: Duration,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(processor: Arc<JobProcessor>, config: &RelayConfig) -> Self {
        Self {
            processor,
            concurrency: config.worker.concurrency.max(1),
            poll_timeout: config.poll_timeout(),
            poll_backoff: config.poll_backoff(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the number of loops (embedded workers)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start the pull loops
    pub fn spawn(&self) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for worker_id in 0..self.concurrency {
            set.spawn(run_worker_loop(
                worker_id,
                self.processor.clone(),
                self.shutdown.clone(),
                self.poll_timeout,
                self.poll_backoff,
            ));
        }
        info!("Started {} worker loop(s)", self.concurrency);
        set
    }

    /// Ask every loop to stop after its current job
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Main worker processing loop
async fn run_worker_loop(
    worker_id: usize,
    processor: Arc<JobProcessor>,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
    poll_backoff: Duration,
) {
    debug!("Worker loop {} running", worker_id);

    while !shutdown.load(Ordering::Relaxed) {
        match processor.process_next(poll_timeout).await {
            Ok(Some(_)) => {}
            Ok(None) => trace!("Worker loop {}: queue empty", worker_id),
            Err(RelayError::AlreadyResolved(id)) => {
                warn!("Worker loop {}: job {} was already resolved", worker_id, id);
            }
            Err(e) => {
                error!("Worker loop {}: {}", worker_id, e);
                tokio::time::sleep(poll_backoff).await;
            }
        }
    }

    debug!("Worker loop {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceError, MockInferenceClient, OpenAiClient};
    use async_trait::async_trait;
    use axum::routing::post;
    use axum::{Json, Router};
    use relay_common::backend::{MemoryBackend, ResultStore};
    use relay_common::config::{BackendKind, InferenceConfig};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Store whose first `failures` completions hit a backend error
    struct FlakyStore {
        inner: MemoryBackend,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryBackend::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl ResultStore for FlakyStore {
        async fn create(&self, record: &JobRecord) -> Result<()> {
            self.inner.create(record).await
        }

        async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
            self.inner.get(id).await
        }

        async fn complete(&self, job: &Job, outcome: JobOutcome) -> Result<JobRecord> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RelayError::backend("connection reset"));
            }
            self.inner.complete(job, outcome).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn test_config(concurrency: usize) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.backend.kind = BackendKind::Memory;
        config.worker.concurrency = concurrency;
        config.worker.poll_timeout_secs = 1;
        config.worker.poll_backoff_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_success_is_recorded() {
        let backend = Backend::in_memory();
        let client = Arc::new(MockInferenceClient::replying("Hi there!"));
        let processor = JobProcessor::new(backend.clone(), client.clone());

        let job = backend.submit("Hello".to_string()).await.unwrap();
        let record = processor
            .process_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.id, job.id);
        assert_eq!(record.state, JobState::Success);
        assert_eq!(record.result.as_deref(), Some("Hi there!"));
        assert_eq!(client.prompts(), vec!["Hello".to_string()]);

        let stored = backend.status(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let backend = Backend::in_memory();
        let processor =
            JobProcessor::new(backend.clone(), Arc::new(MockInferenceClient::rejecting_credentials()));

        let job = backend.submit("Hello".to_string()).await.unwrap();
        processor
            .process_next(Duration::from_millis(10))
            .await
            .unwrap();

        let stored = backend.status(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failure);
        assert!(stored
            .error
            .unwrap()
            .to_lowercase()
            .contains("authentication"));
    }

    #[tokio::test]
    async fn test_outcome_survives_store_errors() {
        let store = Arc::new(FlakyStore::new(2));
        let backend = Backend::new(Arc::new(MemoryBackend::new()), store.clone());
        let client = Arc::new(MockInferenceClient::replying("Hi there!"));
        let processor =
            JobProcessor::new(backend.clone(), client).with_store_backoff(Duration::from_millis(5));

        let job = backend.submit("Hello".to_string()).await.unwrap();
        let record = processor
            .process_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, JobState::Success);
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);

        let stored = backend.status(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("Hi there!"));
        assert_eq!(backend.queue().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counters_follow_stored_outcome() {
        let metrics = relay_common::MetricsRegistry::new().worker;
        let backend = Backend::in_memory();
        let processor = JobProcessor::new(backend.clone(), Arc::new(MockInferenceClient::echo()))
            .with_metrics(metrics.clone());

        let job = backend.submit("Hello".to_string()).await.unwrap();
        let queued = backend
            .queue()
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        backend
            .store()
            .complete(&job, JobOutcome::Failure("resolved elsewhere".to_string()))
            .await
            .unwrap();

        let err = processor.process(queued).await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyResolved(_)));
        assert_eq!(metrics.jobs_succeeded.get(), 0);
        assert_eq!(metrics.jobs_failed.get(), 0);

        backend.submit("Again".to_string()).await.unwrap();
        processor
            .process_next(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(metrics.jobs_succeeded.get(), 1);
        assert_eq!(metrics.active_jobs.get(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_failure() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"choices": []}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = OpenAiClient::new(&InferenceConfig {
            api_base: format!("http://{}/v1", addr),
            api_key: Some("sk-test".to_string()),
            job_timeout_secs: 1,
            ..InferenceConfig::default()
        })
        .unwrap();
        let backend = Backend::in_memory();
        let processor = JobProcessor::new(backend.clone(), Arc::new(client));

        let job = backend.submit("Hello".to_string()).await.unwrap();
        processor
            .process_next(Duration::from_millis(10))
            .await
            .unwrap();

        let stored = backend.status(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failure);
        assert!(stored.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_queue_yields_nothing() {
        let processor = JobProcessor::new(
            Backend::in_memory(),
            Arc::new(MockInferenceClient::echo()),
        );
        let next = processor
            .process_next(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_pool_survives_failures_and_drains_queue() {
        let backend = Backend::in_memory();
        let client = Arc::new(MockInferenceClient::new(|prompt| {
            if prompt.starts_with("fail") {
                Err(InferenceError::MalformedResponse("no choices".to_string()))
            } else {
                Ok(prompt.to_uppercase())
            }
        }));
        let processor = Arc::new(JobProcessor::new(backend.clone(), client.clone()));
        let pool = WorkerPool::new(processor, &test_config(3));

        let mut ids = Vec::new();
        for prompt in ["one", "fail-two", "three", "fail-four", "five"] {
            ids.push(backend.submit(prompt.to_string()).await.unwrap().id);
        }

        let mut loops = pool.spawn();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let mut resolved = 0;
            for id in &ids {
                let record = backend.status(id).await.unwrap().unwrap();
                if record.state.is_terminal() {
                    resolved += 1;
                }
            }
            if resolved == ids.len() {
                break;
            }
            assert!(Instant::now() < deadline, "jobs did not resolve in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown();
        while let Some(joined) = loops.join_next().await {
            joined.unwrap();
        }

        assert_eq!(client.calls(), 5);
        let second = backend.status(&ids[1]).await.unwrap().unwrap();
        assert_eq!(second.state, JobState::Failure);
        let fifth = backend.status(&ids[4]).await.unwrap().unwrap();
        assert_eq!(fifth.result.as_deref(), Some("FIVE"));
    }

    #[test]
    fn test_concurrency_floor() {
        let processor = Arc::new(JobProcessor::new(
            Backend::in_memory(),
            Arc::new(MockInferenceClient::echo()),
        ));
        let pool = WorkerPool::new(processor, &test_config(2)).with_concurrency(0);
        assert_eq!(pool.concurrency(), 1);
        assert!(!pool.is_shutting_down());
    }
}
