//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Retry orchestrator, forwarder, pool, config watcher:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters and histograms, Prometheus scrape endpoint)
//! ```
//!
//! # Design Decisions
//! - Request spans come from tower-http and follow the spawned attempt task
//! - Metric updates go through the `metrics` facade; without an installed
//!   recorder they are no-ops

pub mod logging;
pub mod metrics;
