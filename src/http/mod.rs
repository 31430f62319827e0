//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum router, request ID and trace layers)
//!     → service.rs (one task per request, ChannelSink from sink.rs)
//!     → resilience::retries (attempt loop)
//!     → fallback.rs (503 while the pool is empty)
//!     → forward.rs (pick backend, rewrite, stream response back)
//!     → headers.rs (hop-by-hop hygiene, X-Forwarded-For)
//! ```

pub mod fallback;
pub mod forward;
pub mod handler;
pub mod headers;
pub mod server;
pub mod service;
pub mod sink;

pub use handler::{ClientGone, ClientSink, Handler, ResponseWriter};
pub use server::{HttpServer, ServerError};
