//! Prometheus metrics for build orchestration.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook delivery, labelled by `X-GitHub-Event`.
pub fn webhook_received(event_type: &str) {
    counter!("ci_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a build entering `status`.
pub fn build_status_changed(status: &str) {
    counter!("ci_builds_total", "status" => status.to_string()).increment(1);
}

pub fn build_duration(duration_ms: u64) {
    histogram!("ci_build_duration_ms").record(duration_ms as f64);
}

pub fn step_duration(step_name: &str, duration_ms: u64) {
    histogram!("ci_step_duration_ms", "step" => step_name.to_string()).record(duration_ms as f64);
}

/// A commit status that GitHub did not accept.
pub fn status_report_failed() {
    counter!("ci_status_reports_failed_total").increment(1);
}

/// A finished build that could not be written to the history file.
pub fn history_persist_failed() {
    counter!("ci_history_persist_failures_total").increment(1);
}
