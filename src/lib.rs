//! Catalog-driven reverse proxy library.
//!
//! Routes each request to a service registered in Consul, picked from
//! the request path (`/<service>/...`) or host (`<service>.<domain>`).

// Core subsystems
pub mod config;
pub mod http;
pub mod registry;
pub mod routing;

// Service discovery and coordination
pub mod consul;
pub mod discovery;
pub mod election;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ProxyConfig;
pub use discovery::RegistrySync;
pub use election::LeadershipElection;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::Registry;
