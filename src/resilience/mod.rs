//! Resilience subsystem: retry with replay.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → eligibility.rs (upgrade? rewindable body?)
//!     → retries.rs (attempt loop, budget)
//!         → interceptor.rs (per-attempt writer, holds the head until the first byte)
//!         → failure.rs (connectivity failure vs. delivered response)
//!         → listeners.rs (notified once per executed retry)
//!     → client sink
//! ```
//!
//! # Design Decisions
//! - Only attempts that never reached an application are retried
//! - Retry is decided by the path that produced a status, never its value
//! - At most one response body ever reaches the client

pub mod eligibility;
pub mod failure;
pub mod interceptor;
pub mod listeners;
pub mod retries;

pub use failure::{ConnectivityFailure, ServeError};
pub use listeners::{MetricsListener, QueuedListener, RetryListener, RetryListeners};
pub use retries::{InvalidRetryBudget, Retry};
