//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_roundtrips_total` (counter): proxied round trips by service, status
//! - `proxy_roundtrips_latency_seconds` (summary): round trip latency by service
//! - `proxy_registry_updates_total` (counter): registry replacements
//! - `proxy_registry_services` (gauge): services currently routable
//! - `proxy_watchers_active` (gauge): per-service catalog watches
//! - `proxy_resync_errors_total` (counter): failed resyncs
//! - `proxy_leader` (gauge): 1 while this instance holds leadership
//! - `proxy_election_attempts_total` (counter): lock acquisition attempts by outcome
//!
//! # Design Decisions
//! - One recorder per process; `init_metrics` hands back the same handle
//!   on repeated calls so several servers in one test binary can share it
//! - Latency histograms render as summaries (no bucket config)

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub const ROUNDTRIPS_TOTAL: &str = "proxy_roundtrips_total";
pub const ROUNDTRIPS_LATENCY: &str = "proxy_roundtrips_latency_seconds";
pub const REGISTRY_UPDATES_TOTAL: &str = "proxy_registry_updates_total";
pub const REGISTRY_SERVICES: &str = "proxy_registry_services";
pub const WATCHERS_ACTIVE: &str = "proxy_watchers_active";
pub const RESYNC_ERRORS_TOTAL: &str = "proxy_resync_errors_total";
pub const LEADER: &str = "proxy_leader";
pub const ELECTION_ATTEMPTS_TOTAL: &str = "proxy_election_attempts_total";

/// Status label recorded when the backend could not be reached at all.
pub const TRANSPORT_ERROR_STATUS: &str = "5000";

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Must be called from within a tokio runtime: it spawns the upkeep task
/// that drains summary buckets.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    let mut slot = HANDLE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();

    let upkeep = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            upkeep.run_upkeep();
        }
    });

    tracing::info!("Prometheus recorder installed");
    *slot = Some(handle.clone());
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(ROUNDTRIPS_TOTAL, "Proxied round trips by service and status");
    metrics::describe_histogram!(
        ROUNDTRIPS_LATENCY,
        metrics::Unit::Seconds,
        "Proxied round trip latency by service"
    );
    metrics::describe_counter!(REGISTRY_UPDATES_TOTAL, "Registry replacements");
    metrics::describe_gauge!(REGISTRY_SERVICES, "Services currently in the registry");
    metrics::describe_gauge!(WATCHERS_ACTIVE, "Active per-service catalog watches");
    metrics::describe_counter!(RESYNC_ERRORS_TOTAL, "Failed registry resyncs");
    metrics::describe_gauge!(LEADER, "1 while this instance is the leader");
    metrics::describe_counter!(ELECTION_ATTEMPTS_TOTAL, "Leadership lock attempts by outcome");
}

/// Record one proxied round trip. `status` is `None` on transport failure.
pub fn record_roundtrip(service: &str, status: Option<u16>, start: Instant) {
    let status = status.map_or_else(|| TRANSPORT_ERROR_STATUS.to_string(), |s| s.to_string());
    counter!(ROUNDTRIPS_TOTAL, "service" => service.to_string(), "status" => status).increment(1);
    histogram!(ROUNDTRIPS_LATENCY, "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_registry_update(services: usize) {
    counter!(REGISTRY_UPDATES_TOTAL).increment(1);
    gauge!(REGISTRY_SERVICES).set(services as f64);
}

pub fn record_active_watchers(count: usize) {
    gauge!(WATCHERS_ACTIVE).set(count as f64);
}

pub fn record_resync_error() {
    counter!(RESYNC_ERRORS_TOTAL).increment(1);
}

pub fn record_leadership(is_leader: bool) {
    gauge!(LEADER).set(if is_leader { 1.0 } else { 0.0 });
}

/// `outcome` is one of `acquired` or `error`.
pub fn record_election_attempt(outcome: &'static str) {
    counter!(ELECTION_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}
