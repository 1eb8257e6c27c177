//! Metrics collection for Prompt Relay
//!
//! Prometheus counters for the submission/polling protocol and the worker
//! pull loops, plus a tiny axum router exposing them as text.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Metrics registry for Prompt Relay
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub gateway: GatewayMetrics,
    pub worker: WorkerMetrics,
}

/// Web tier metrics
#[derive(Debug, Clone)]
pub struct GatewayMetrics {
    /// Jobs accepted by `POST /ask`
    pub jobs_submitted: IntCounter,

    /// Submissions rejected before enqueueing
    pub jobs_rejected: IntCounter,

    /// Calls to `GET /result/{id}`
    pub status_polls: IntCounter,
}

/// Worker tier metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Jobs resolved with SUCCESS
    pub jobs_succeeded: IntCounter,

    /// Jobs resolved with FAILURE
    pub jobs_failed: IntCounter,

    /// Wall time of one inference call
    pub job_duration: Histogram,

    /// Jobs waiting in the in-memory queue
    pub queue_depth: IntGauge,

    /// Jobs currently being executed
    pub active_jobs: IntGauge,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name is valid");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name is valid");
    registry
        .register(Box::new(gauge.clone()))
        .expect("metric registered once");
    gauge
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Registry::new();

        let gateway = GatewayMetrics {
            jobs_submitted: counter(
                &registry,
                "relay_jobs_submitted_total",
                "Total number of jobs accepted for execution",
            ),
            jobs_rejected: counter(
                &registry,
                "relay_jobs_rejected_total",
                "Total number of submissions rejected before enqueueing",
            ),
            status_polls: counter(
                &registry,
                "relay_status_polls_total",
                "Total number of status lookups",
            ),
        };

        let job_duration = Histogram::with_opts(
            HistogramOpts::new(
                "relay_job_duration_seconds",
                "Inference call duration in seconds",
            )
            .buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 360.0]),
        )
        .expect("metric name is valid");
        registry
            .register(Box::new(job_duration.clone()))
            .expect("metric registered once");

        let worker = WorkerMetrics {
            jobs_succeeded: counter(
                &registry,
                "relay_jobs_succeeded_total",
                "Total number of jobs resolved successfully",
            ),
            jobs_failed: counter(
                &registry,
                "relay_jobs_failed_total",
                "Total number of jobs resolved with a failure",
            ),
            job_duration,
            queue_depth: gauge(
                &registry,
                "relay_queue_depth",
                "Current number of queued jobs (memory backend)",
            ),
            active_jobs: gauge(
                &registry,
                "relay_active_jobs",
                "Current number of jobs being executed",
            ),
        };

        MetricsRegistry {
            registry: Arc::new(registry),
            gateway,
            worker,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                warn!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.gather(),
    )
}

/// Router serving `GET /metrics`
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve `GET /metrics` on its own listener
pub async fn serve_metrics(addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving metrics on {}", addr);
    axum::serve(listener, metrics_router::<()>()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.gateway.jobs_submitted.inc();
        metrics.worker.queue_depth.set(3);
        metrics.worker.job_duration.observe(0.8);

        let output = metrics.gather();
        assert!(output.contains("relay_jobs_submitted_total 1"));
        assert!(output.contains("relay_queue_depth 3"));
        assert!(output.contains("relay_job_duration_seconds"));
    }
}
