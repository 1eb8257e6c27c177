//! In-process queue and result store
//!
//! Backs the standalone gateway (embedded workers) and the tests. The queue is
//! lock-free; waiting consumers park on a `Notify`. Records older than the
//! configured TTL are hidden from lookups and pruned on submission.

use super::{JobQueue, ResultStore};
use crate::error::Result;
use crate::job::{unix_now, Job, JobOutcome, JobRecord};
use crate::metrics::METRICS;
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Queue and store living in this process
pub struct MemoryBackend {
    /// Pending jobs (lock-free)
    queue: SegQueue<Job>,

    /// Current queue depth
    queue_depth: AtomicUsize,

    /// Notification for new jobs
    notify: Notify,

    /// Job records by id
    records: RwLock<HashMap<String, JobRecord>>,

    /// Record expiry; `None` keeps records forever
    ttl: Option<Duration>,

    /// Unix second of the last prune
    last_prune: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Backend whose records expire `ttl` after their last state change
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            queue: SegQueue::new(),
            queue_depth: AtomicUsize::new(0),
            notify: Notify::new(),
            records: RwLock::new(HashMap::new()),
            ttl,
            last_prune: AtomicU64::new(0),
        }
    }

    fn is_live(&self, record: &JobRecord, now: u64) -> bool {
        self.ttl.map_or(true, |ttl| !record.is_expired(now, ttl))
    }

    /// Drop expired records, at most once per second
    fn prune(&self, records: &mut HashMap<String, JobRecord>, now: u64) {
        let Some(ttl) = self.ttl else {
            return;
        };
        if self.last_prune.swap(now, Ordering::Relaxed) == now {
            return;
        }

        let before = records.len();
        records.retain(|_, record| !record.is_expired(now, ttl));
        let pruned = before - records.len();
        if pruned > 0 {
            debug!("Pruned {} expired job record(s)", pruned);
        }
    }

    fn pop(&self) -> Option<Job> {
        let job = self.queue.pop()?;
        let depth = self.queue_depth.fetch_sub(1, Ordering::Relaxed) - 1;
        METRICS.worker.queue_depth.set(depth as i64);
        Some(job)
    }

    /// Number of records held, expired ones included until pruned
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    #[cfg(test)]
    pub(crate) fn record_ids(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryBackend {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        // Count before publishing so a concurrent pop never underflows
        let depth = self.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.queue.push(job.clone());
        METRICS.worker.queue_depth.set(depth as i64);
        self.notify.notify_one();

        trace!("Job {} queued, queue depth: {}", job.id, depth);
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>> {
        if let Some(job) = self.pop() {
            return Ok(Some(job));
        }

        // A timeout just means the queue stayed empty
        let _ = timeout(wait, self.notify.notified()).await;

        Ok(self.pop())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.queue_depth.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl ResultStore for MemoryBackend {
    async fn create(&self, record: &JobRecord) -> Result<()> {
        let now = unix_now();
        let mut records = self.records.write();
        self.prune(&mut records, now);
        records
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let now = unix_now();
        Ok(self
            .records
            .read()
            .get(id)
            .filter(|record| self.is_live(record, now))
            .cloned())
    }

    async fn complete(&self, job: &Job, outcome: JobOutcome) -> Result<JobRecord> {
        let mut records = self.records.write();
        let record = records
            .entry(job.id.clone())
            .or_insert_with(|| JobRecord::pending(job));

        record.resolve(outcome)?;
        Ok(record.clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
