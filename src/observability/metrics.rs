//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_rejections_total` (counter): rejected requests by kind
//! - `gate_sessions_created_total` (counter): sessions started
//! - `gate_sessions_reaped_total` (counter): expired sessions removed by the reaper
//! - `gate_sessions_active` (gauge): stored sessions after the last sweep
//! - `gate_rate_limit_evicted_total` (counter): idle limiter keys dropped
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing when the exporter is disabled.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_rejection(kind: &'static str) {
    metrics::counter!("gate_rejections_total", "kind" => kind).increment(1);
}

pub fn record_session_created() {
    metrics::counter!("gate_sessions_created_total").increment(1);
}

pub fn record_sessions_reaped(count: usize) {
    metrics::counter!("gate_sessions_reaped_total").increment(count as u64);
}

pub fn record_active_sessions(count: usize) {
    metrics::gauge!("gate_sessions_active").set(count as f64);
}

pub fn record_rate_limit_evicted(count: usize) {
    metrics::counter!("gate_rate_limit_evicted_total").increment(count as u64);
}
