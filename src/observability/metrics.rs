//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bff_upstream_requests_total` (counter): round trips by upstream, method, status
//! - `bff_upstream_failures_total` (counter): round trips without a response
//! - `bff_upstream_duration_seconds` (histogram): round-trip latency by upstream
//! - `bff_rendered_views_total` (counter): rendered pages by view, status

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::Method;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::StartupError;

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), StartupError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| StartupError::Metrics(err.to_string()))?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_upstream(upstream: &'static str, method: &Method, status: u16, elapsed: Duration) {
    ::metrics::counter!(
        "bff_upstream_requests_total",
        "upstream" => upstream,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("bff_upstream_duration_seconds", "upstream" => upstream)
        .record(elapsed.as_secs_f64());
}

pub fn record_upstream_failure(upstream: &'static str, method: &Method) {
    ::metrics::counter!(
        "bff_upstream_failures_total",
        "upstream" => upstream,
        "method" => method.to_string()
    )
    .increment(1);
}

pub fn record_render(view: &str, status: u16) {
    ::metrics::counter!(
        "bff_rendered_views_total",
        "view" => view.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
