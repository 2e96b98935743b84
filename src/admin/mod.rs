//! Administrative endpoints.
//!
//! Served on the proxy port under `/_/` plus `/metrics`. These paths take
//! precedence over proxying, so services named `_` or `metrics` are not
//! reachable in path mode.

pub mod handlers;
pub mod info;

use axum::{routing::get, Router};

use crate::http::server::AppState;
use self::handlers::*;

pub use info::{hostname, instance_identity, BuildInfo};

pub fn setup_admin_router() -> Router<AppState> {
    Router::new()
        .route("/_/registry", get(get_registry))
        .route("/_/ping", get(ping))
        .route("/_/status", get(get_status))
        .route("/_/config", get(get_config))
        .route("/metrics", get(get_metrics))
}
