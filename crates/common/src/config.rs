//! Configuration structures for Prompt Relay
//!
//! One `RelayConfig` is built at process start and shared by reference with
//! the HTTP handlers and the workers. Values are layered: built-in defaults,
//! an optional YAML file, `RELAY__SECTION__KEY` environment variables, and
//! finally the conventional `REDIS_URL` / `OPENAI_API_KEY` variables.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML config file
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Config file used when `RELAY_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "configs/relay.yaml";

/// Queue/store connection URL
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Inference API credential
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration for Prompt Relay components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Queue and result store
    #[serde(default)]
    pub backend: BackendConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Worker pull loops
    #[serde(default)]
    pub worker: WorkerConfig,

    /// External inference API
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Backend technology for the queue and the result store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process queue and store; only usable with embedded workers
    Memory,

    /// Shared Redis list and keys
    Redis,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

/// Queue and result store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,

    /// Connection URL (e.g. `redis://localhost:6379/0`)
    pub url: Option<String>,

    /// Redis list holding queued jobs
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Prefix of the per-job result keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry of job records in seconds (0 = never)
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
}

/// Gateway-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Origins allowed by CORS; empty disables the layer
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Answer unknown ids with NOT_FOUND instead of PENDING
    #[serde(default)]
    pub report_unknown_jobs: bool,

    /// Longest accepted prompt, in characters
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Workers spawned inside the gateway process
    #[serde(default)]
    pub embedded_workers: usize,
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent pull loops
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long one dequeue waits for a job
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Pause after a backend error before pulling again
    #[serde(default = "default_poll_backoff")]
    pub poll_backoff_ms: u64,

    /// Port of the standalone worker's metrics endpoint
    pub metrics_port: Option<u16>,
}

/// Inference API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bearer credential; absence fails every job, not startup
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on one inference request
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Redis
}

fn default_queue_key() -> String {
    "relay:queue".to_string()
}

fn default_key_prefix() -> String {
    "relay:job:".to_string()
}

fn default_result_ttl() -> u64 {
    86_400 // one day
}

fn default_max_prompt_chars() -> usize {
    32_000
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_timeout() -> u64 {
    5
}

fn default_poll_backoff() -> u64 {
    500
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_job_timeout() -> u64 {
    360
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            url: None,
            queue_key: default_queue_key(),
            key_prefix: default_key_prefix(),
            result_ttl_secs: default_result_ttl(),
        }
    }
}

impl BackendConfig {
    /// Expiry of job records, if any
    pub fn result_ttl(&self) -> Option<Duration> {
        match self.result_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            report_unknown_jobs: false,
            max_prompt_chars: default_max_prompt_chars(),
            embedded_workers: 0,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_timeout_secs: default_poll_timeout(),
            poll_backoff_ms: default_poll_backoff(),
            metrics_port: None,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            backend: BackendConfig::default(),
            gateway: GatewayConfig::default(),
            worker: WorkerConfig::default(),
            inference: InferenceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Which binary is validating the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Gateway,
    Worker,
}

impl RelayConfig {
    /// Load configuration the way the binaries do: the file named by
    /// `RELAY_CONFIG` (optional), then the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);

        let builder = ::config::Config::builder()
            .add_source(::config::File::from(path.as_path()).required(false))
            .add_source(
                ::config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("gateway.allowed_origins"),
            )
            .set_override_option("backend.url", std::env::var(REDIS_URL_ENV).ok())?
            .set_override_option("inference.api_key", std::env::var(API_KEY_ENV).ok())?;

        let config: RelayConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only, ignoring the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RelayError::config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }

        let config: RelayConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration for the given role
    pub fn validate(&self, role: Role) -> Result<()> {
        if self.port == 0 {
            return Err(RelayError::config("port must be non-zero"));
        }

        match self.backend.kind {
            BackendKind::Redis => {
                if self.backend.url.as_deref().map_or(true, str::is_empty) {
                    return Err(RelayError::config(format!(
                        "redis backend requires backend.url or {}",
                        REDIS_URL_ENV
                    )));
                }
            }
            BackendKind::Memory => match role {
                Role::Gateway if self.gateway.embedded_workers == 0 => {
                    return Err(RelayError::config(
                        "memory backend requires gateway.embedded_workers > 0",
                    ));
                }
                Role::Worker => {
                    return Err(RelayError::config(
                        "memory backend cannot be shared with a standalone worker",
                    ));
                }
                Role::Gateway => {}
            },
        }

        if self.worker.concurrency == 0 {
            return Err(RelayError::config("worker.concurrency must be at least 1"));
        }

        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(RelayError::config(format!(
                "inference.temperature {} outside [0, 2]",
                self.inference.temperature
            )));
        }

        if self.inference.job_timeout_secs == 0 {
            return Err(RelayError::config("inference.job_timeout_secs must be positive"));
        }

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Upper bound on one inference request
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.inference.job_timeout_secs)
    }

    /// How long a worker waits on an empty queue
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.poll_timeout_secs)
    }

    /// Pause after a backend failure
    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.worker.poll_backoff_ms)
    }
}
