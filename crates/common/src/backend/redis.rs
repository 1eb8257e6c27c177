//! Redis queue and result store
//!
//! Jobs travel as JSON on a list (`LPUSH` / `BRPOP`); each job record lives
//! under `{key_prefix}{id}` with the configured expiry. Resolution goes through
//! a Lua script so a terminal record is never overwritten, even with many
//! workers racing on the same id.

use super::{JobQueue, ResultStore};
use crate::config::BackendConfig;
use crate::error::{RelayError, Result};
use crate::job::{Job, JobOutcome, JobRecord};
use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, Script};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sets the record unless the stored one is already terminal. Returns 1 on write.
const COMPLETE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, record = pcall(cjson.decode, current)
  if ok and record['state'] ~= 'PENDING' then
    return 0
  end
end
if tonumber(ARGV[2]) > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
else
  redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

/// Queue and store backed by a Redis server
pub struct RedisBackend {
    /// Shared connection for non-blocking commands
    conn: MultiplexedConnection,

    /// Dedicated connection for `BRPOP`, which would stall the shared one
    blocking: Mutex<MultiplexedConnection>,

    queue_key: String,
    key_prefix: String,
    ttl_secs: u64,
    complete_script: Script,
}

impl RedisBackend {
    /// Open both connections
    pub async fn connect(url: &str, config: &BackendConfig) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let blocking = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            conn,
            blocking: Mutex::new(blocking),
            queue_key: config.queue_key.clone(),
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.result_ttl().map_or(0, |ttl| ttl.as_secs()),
            complete_script: Script::new(COMPLETE_SCRIPT),
        })
    }

    fn record_key(&self, id: &str) -> String {
        record_key(&self.key_prefix, id)
    }
}

/// Key of a job record
pub fn record_key(prefix: &str, id: &str) -> String {
    format!("{}{}", prefix, id)
}

/// `BRPOP` timeout in whole seconds; 0 would block forever
pub fn blocking_timeout_secs(wait: Duration) -> u64 {
    wait.as_secs().max(1)
}

#[async_trait]
impl JobQueue for RedisBackend {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();

        let _: () = ::redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>> {
        let mut conn = self.blocking.lock().await;

        let popped: Option<(String, String)> = ::redis::cmd("BRPOP")
            .arg(&self.queue_key)
            .arg(blocking_timeout_secs(wait))
            .query_async(&mut *conn)
            .await?;

        match popped {
            Some((_, payload)) => match serde_json::from_str::<Job>(&payload) {
                Ok(job) => Ok(Some(job)),
                Err(e) => {
                    // Nothing can run a job we cannot read; drop it
                    warn!("Discarding malformed queue entry: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = ::redis::cmd("LLEN")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

#[async_trait]
impl ResultStore for RedisBackend {
    async fn create(&self, record: &JobRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let mut cmd = ::redis::cmd("SET");
        cmd.arg(self.record_key(&record.id)).arg(payload).arg("NX");
        if self.ttl_secs > 0 {
            cmd.arg("EX").arg(self.ttl_secs);
        }

        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = ::redis::cmd("GET")
            .arg(self.record_key(id))
            .query_async(&mut conn)
            .await?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(RelayError::from))
            .transpose()
    }

    async fn complete(&self, job: &Job, outcome: JobOutcome) -> Result<JobRecord> {
        let mut record = match self.get(&job.id).await? {
            Some(existing) => existing,
            None => {
                debug!("Record for job {} expired or missing, recreating", job.id);
                JobRecord::pending(job)
            }
        };
        record.resolve(outcome)?;

        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let written: i64 = self
            .complete_script
            .key(self.record_key(&job.id))
            .arg(payload)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        if written == 0 {
            return Err(RelayError::already_resolved(job.id.clone()));
        }
        Ok(record)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(RelayError::backend(format!("unexpected PING reply: {}", reply)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_layout() {
        assert_eq!(record_key("relay:job:", "abc123"), "relay:job:abc123");
    }

    #[test]
    fn test_blocking_timeout_never_zero() {
        assert_eq!(blocking_timeout_secs(Duration::from_millis(200)), 1);
        assert_eq!(blocking_timeout_secs(Duration::from_secs(5)), 5);
    }

    #[test]
    fn test_queue_payload_is_plain_job_json() {
        let job = Job::new("Hello".to_string());
        let payload = serde_json::to_string(&job).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["prompt"], "Hello");
        assert_eq!(value["id"], job.id.as_str());
    }
}
