//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_registry_updates_total` (counter): successful registry queries by endpoint
//! - `bridge_registry_query_errors_total` (counter): failed registry queries by endpoint
//! - `bridge_role_writes_total` (counter): routing model writes
//! - `bridge_proxy_launches_total` (counter): proxy launches by result
//! - `bridge_proxy_restart_epoch` (gauge): next restart epoch
//! - `bridge_proxy_active_instances` (gauge): live proxy generations
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are static strings; no per-object cardinality

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_registry_update(endpoint: &'static str) {
    metrics::counter!("bridge_registry_updates_total", "endpoint" => endpoint).increment(1);
}

pub fn record_registry_error(endpoint: &'static str) {
    metrics::counter!("bridge_registry_query_errors_total", "endpoint" => endpoint).increment(1);
}

pub fn record_role_write() {
    metrics::counter!("bridge_role_writes_total").increment(1);
}

pub fn record_proxy_launch(result: &'static str) {
    metrics::counter!("bridge_proxy_launches_total", "result" => result).increment(1);
}

pub fn set_restart_epoch(epoch: u32) {
    metrics::gauge!("bridge_proxy_restart_epoch").set(f64::from(epoch));
}

pub fn set_active_instances(count: usize) {
    metrics::gauge!("bridge_proxy_active_instances").set(count as f64);
}
