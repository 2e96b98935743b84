use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::admin::info::{LeadershipStatus, StatusReport};
use crate::config::ProxyConfig;
use crate::http::server::AppState;
use crate::registry::RegistrySnapshot;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub async fn get_registry(State(state): State<AppState>) -> Json<RegistrySnapshot> {
    Json(state.registry.snapshot())
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    let info = &state.info;
    let leadership = match &state.election {
        Some(election) => LeadershipStatus {
            enabled: true,
            is_leader: election.is_leader(),
            state: Some(election.state()),
            leader: election.leader(),
            lock_key: Some(election.lock_key().to_string()),
        },
        None => LeadershipStatus {
            enabled: false,
            is_leader: false,
            state: None,
            leader: None,
            lock_key: None,
        },
    };

    Json(StatusReport {
        name: info.name,
        version: info.version,
        started_at: info.started_at_unix(),
        uptime_secs: info.uptime_secs(),
        hostname: info.hostname.clone(),
        work_dir: info.work_dir.as_ref().map(|dir| dir.display().to_string()),
        environment: state.config.environment.clone(),
        leadership,
    })
}

/// Effective configuration. The catalog token is skipped by serde.
pub async fn get_config(State(state): State<AppState>) -> Json<ProxyConfig> {
    Json(state.config.as_ref().clone())
}

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
