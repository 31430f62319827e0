//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): settled requests by method, status
//!   (numeric code, or `aborted`)
//! - `proxy_request_duration_seconds` (histogram): time to settle a request
//! - `proxy_request_attempts` (histogram): attempts used per request
//! - `proxy_retries_total` (counter): executed retries by failed attempt number

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

pub const REQUESTS_TOTAL: &str = "proxy_requests_total";
pub const REQUEST_DURATION: &str = "proxy_request_duration_seconds";
pub const REQUEST_ATTEMPTS: &str = "proxy_request_attempts";
pub const RETRIES_TOTAL: &str = "proxy_retries_total";

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    ::metrics::describe_counter!(REQUESTS_TOTAL, "Requests settled, by method and status");
    ::metrics::describe_histogram!(
        REQUEST_DURATION,
        ::metrics::Unit::Seconds,
        "Time from request arrival to the settled response"
    );
    ::metrics::describe_histogram!(REQUEST_ATTEMPTS, "Attempts used per request");
    ::metrics::describe_counter!(RETRIES_TOTAL, "Retries executed after a connectivity failure");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a settled request. `status` is the numeric code, or `aborted` for
/// a response torn down after streaming began.
pub fn record_request(method: &str, status: &str, attempts: usize, start: Instant) {
    ::metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.to_owned(),
        "status" => status.to_owned()
    )
    .increment(1);
    ::metrics::histogram!(REQUEST_DURATION).record(start.elapsed().as_secs_f64());
    ::metrics::histogram!(REQUEST_ATTEMPTS).record(attempts as f64);
}

/// Record one executed retry. `attempt` is the attempt that failed.
pub fn record_retry(attempt: usize) {
    ::metrics::counter!(RETRIES_TOTAL, "attempt" => attempt.to_string()).increment(1);
}
