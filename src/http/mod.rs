//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, admin routes)
//!     → request.rs (request ID)
//!     → routing::resolver (service name + forwarded path)
//!     → registry lookup → load_balancer (endpoint)
//!     → forward.rs (upstream round trip, metrics)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod server;

pub use forward::{ForwardError, Forwarder};
pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
