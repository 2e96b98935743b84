//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background workers (registry sync, leader election)
//! - Bind the listener and begin accepting traffic
//! - Drive the ordered shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when ready)

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::instance_identity;
use crate::config::ProxyConfig;
use crate::consul::{ConsulCatalog, ConsulClient, ConsulLocker};
use crate::discovery::{CatalogError, RegistrySync};
use crate::election::LeadershipElection;
use crate::http::{ForwardError, HttpServer};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::{Shutdown, Supervisor};
use crate::observability::metrics::{self, MetricsError};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("upstream client: {0}")]
    Forward(#[from] ForwardError),

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run the proxy against the configured Consul agent until a termination
/// signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let metrics = metrics::init_metrics()?;

    let registry = Arc::new(Registry::new());
    let client = Arc::new(ConsulClient::new(&config.catalog)?);
    tracing::info!(address = %client.address(), "Using Consul agent");

    let mut supervisor = Supervisor::new();
    let sync = Arc::new(RegistrySync::new(
        registry.clone(),
        Arc::new(ConsulCatalog::new(client.clone())),
        config.service_name.clone(),
    ));
    supervisor.spawn(sync);

    let mut server = HttpServer::new(config.clone(), registry)?.with_metrics(metrics);

    if config.election.enabled {
        let locker = Arc::new(ConsulLocker::new(
            client,
            config.election.session_ttl(),
            config.election.lock_delay(),
        ));
        let election = Arc::new(LeadershipElection::new(
            locker,
            config.lock_key(),
            instance_identity(&config.service_name),
            config.election.retry_interval(),
        ));
        supervisor.spawn(election.clone());
        server = server.with_election(election);
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|source| StartupError::Bind { port: config.port, source })?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    serve(server, listener, supervisor, shutdown, config.shutdown_timeout()).await
}

/// Serve until `shutdown` fires, then stop workers and drain requests.
///
/// Both phases are bounded by `deadline`.
pub async fn serve(
    server: HttpServer,
    listener: TcpListener,
    supervisor: Supervisor,
    shutdown: Shutdown,
    deadline: Duration,
) -> Result<(), StartupError> {
    let mut stop = shutdown.subscribe();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = stop.recv() => {}
        result = &mut server_task => {
            // The server ended on its own; nothing left to drain.
            supervisor.shutdown(deadline).await;
            return Ok(result??);
        }
    }

    tracing::info!(deadline = ?deadline, "Shutting down");
    supervisor.shutdown(deadline).await;

    match tokio::time::timeout(deadline, &mut server_task).await {
        Ok(result) => result??,
        Err(_) => {
            server_task.abort();
            tracing::warn!("In-flight requests did not drain before deadline");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
