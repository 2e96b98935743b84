//! Catalog Proxy
//!
//! A reverse proxy whose routing table is kept in sync with Consul.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    CATALOG PROXY                     │
//!                     │                                                      │
//!  Client Request     │  ┌─────────┐    ┌──────────┐    ┌───────────────┐    │
//!  ───────────────────┼─▶│  http   │───▶│ routing  │───▶│   registry    │    │
//!                     │  │ server  │    │ resolver │    │    lookup     │    │
//!                     │  └─────────┘    └──────────┘    └──────┬────────┘    │
//!                     │                                        ▼             │
//!  Client Response    │  ┌─────────┐                    ┌───────────────┐    │
//!  ◀──────────────────┼──│ forward │◀───────────────────│ load_balancer │    │
//!                     │  └────┬────┘                    └───────────────┘    │
//!                     │       │                                ▲             │
//!                     │       ▼ Backend                        │ update      │
//!                     │                      ┌───────────────────────┐       │
//!                     │   Consul ──watch──▶  │ discovery (sync loop) │       │
//!                     │   Consul ◀─session─  │ election (HA leader)  │       │
//!                     │                      └───────────────────────┘       │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;

use catalog_proxy::config::{self, Args};
use catalog_proxy::lifecycle;
use catalog_proxy::observability::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::resolve(&args)?;

    init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        port = config.port,
        service_name = %config.service_name,
        election = config.election.enabled,
        "catalog-proxy starting"
    );

    lifecycle::run(config).await?;
    Ok(())
}
