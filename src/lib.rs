//! HTTP reverse proxy with transparent retry and request replay.
//!
//! Attempts that fail before reaching any backend are replayed against the
//! next backend in the pool, as long as nothing of the response has been sent
//! to the client yet.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use resilience::retries::Retry;
