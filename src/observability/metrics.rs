//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_forward_requests_total` (counter): forwarded requests by transport, method, status
//! - `gateway_forward_duration_seconds` (histogram): time to upstream response headers
//! - `gateway_forward_errors_total` (counter): failed forwards by transport and error kind

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_forward(transport: &'static str, method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_forward_requests_total",
        "transport" => transport,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_forward_duration_seconds", "transport" => transport)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_forward_error(transport: &'static str, kind: &'static str, start: Instant) {
    metrics::counter!(
        "gateway_forward_errors_total",
        "transport" => transport,
        "kind" => kind
    )
    .increment(1);
    metrics::histogram!("gateway_forward_duration_seconds", "transport" => transport)
        .record(start.elapsed().as_secs_f64());
}
