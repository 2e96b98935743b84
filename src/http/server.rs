//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with admin routes and the proxy fallback
//! - Wire up middleware (request ID, tracing, server headers, timeout)
//! - Bind server to listener with graceful shutdown
//! - Resolve the service, pick an endpoint, forward the request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{self, BuildInfo};
use crate::config::ProxyConfig;
use crate::election::LeadershipElection;
use crate::http::forward::{ForwardError, Forwarder};
use crate::http::request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::load_balancer::{LoadBalancer, RandomBalancer};
use crate::registry::Registry;
use crate::routing::ServiceResolver;

pub const SERVER_NAME: &str = "catalog-proxy";

static X_PROXY_VERSION: HeaderName = HeaderName::from_static("x-proxy-version");

/// Extra time the router-wide timeout allows beyond the upstream deadline,
/// so an upstream timeout surfaces as 502 rather than 408.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub registry: Arc<Registry>,
    pub resolver: Arc<ServiceResolver>,
    pub balancer: Arc<dyn LoadBalancer>,
    pub forwarder: Arc<Forwarder>,
    pub election: Option<Arc<LeadershipElection>>,
    pub metrics: Option<PrometheusHandle>,
    pub info: Arc<BuildInfo>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a server routing to the services in `registry`.
    pub fn new(config: ProxyConfig, registry: Arc<Registry>) -> Result<Self, ForwardError> {
        let forwarder = Forwarder::new(&config.routing)?;
        let resolver = ServiceResolver::from_domain(config.routing.domain.as_deref());

        let state = AppState {
            config: Arc::new(config),
            registry,
            resolver: Arc::new(resolver),
            balancer: Arc::new(RandomBalancer::new()),
            forwarder: Arc::new(forwarder),
            election: None,
            metrics: None,
            info: Arc::new(BuildInfo::capture()),
        };
        Ok(Self { state })
    }

    pub fn with_election(mut self, election: Arc<LeadershipElection>) -> Self {
        self.state.election = Some(election);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    pub fn with_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.state.balancer = balancer;
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let timeout = self.state.config.routing.request_timeout() + TIMEOUT_GRACE;

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = request.request_id().unwrap_or("unknown"),
                )
            }))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(SetResponseHeaderLayer::overriding(
                header::SERVER,
                HeaderValue::from_static(SERVER_NAME),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                X_PROXY_VERSION.clone(),
                HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
            ))
            .layer(TimeoutLayer::new(timeout));

        admin::setup_admin_router()
            .fallback(proxy_handler)
            .with_state(self.state.clone())
            .layer(middleware)
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            mode = ?self.state.resolver.mode(),
            "HTTP server starting"
        );

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Resolves the service, selects an endpoint, and forwards the request.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request.request_id().unwrap_or("unknown").to_string();

    let target = match state.resolver.resolve(&request) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(request_id = %request_id, uri = %request.uri(), error = %e, "Routing failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let endpoints = state.registry.lookup(&target.service).unwrap_or_default();
    let Some(endpoint) = state.balancer.next_endpoint(&endpoints) else {
        tracing::warn!(request_id = %request_id, service = %target.service, "Service not found in registry");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("service {} not found in registry", target.service),
        )
            .into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        service = %target.service,
        endpoint = %endpoint,
        path = %target.path_and_query,
        "Proxying request"
    );

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match state.forwarder.forward(&target, endpoint, request, client_addr).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(request_id = %request_id, service = %target.service, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
