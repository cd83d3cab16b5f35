//! Prometheus metrics for queue consumers
//!
//! Provides observability into notification packs and poll health.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another
/// recorder is already installed the call logs a warning and leaves it alone.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_ok() {
                info!("Prometheus metrics initialized");
            }
        }
        Err(e) => warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Notification pack metrics, labelled by topic
#[derive(Debug, Clone)]
pub struct PackMetrics {
    topic: String,
}

impl PackMetrics {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Record a non-empty poll
    pub fn pack_polled(&self, size: usize) {
        counter!(
            "queue_consumer_packs_total",
            "topic" => self.topic.clone()
        )
        .increment(1);

        histogram!(
            "queue_consumer_pack_size",
            "topic" => self.topic.clone()
        )
        .record(size as f64);
    }

    /// Record the outcome counts of a finished pack wait
    pub fn pack_finished(
        &self,
        succeeded: usize,
        failed: usize,
        timed_out: usize,
        waited: Duration,
    ) {
        for (status, count) in [
            ("success", succeeded),
            ("failed", failed),
            ("timeout", timed_out),
        ] {
            if count > 0 {
                counter!(
                    "queue_consumer_notifications_total",
                    "topic" => self.topic.clone(),
                    "status" => status
                )
                .increment(count as u64);
            }
        }

        histogram!(
            "queue_consumer_pack_wait_seconds",
            "topic" => self.topic.clone()
        )
        .record(waited.as_secs_f64());
    }

    /// Record a failed poll
    pub fn poll_failed(&self) {
        counter!(
            "queue_consumer_poll_errors_total",
            "topic" => self.topic.clone()
        )
        .increment(1);
    }
}
