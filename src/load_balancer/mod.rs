//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt dispatched
//!     → BackendTarget::select_next (pool.rs)
//!     → LoadBalancer strategy picks a member:
//!         - round_robin.rs (rotate through backends)
//!     → backend.rs (parsed URL, scheme + authority)
//!     → Forwarder sends the request
//! ```
//!
//! # Design Decisions
//! - Membership is mutated externally (config reload), never by the retry core
//! - Selection strategy is stateless with respect to membership
//! - The pool is shared by reference across concurrent requests

pub mod backend;
pub mod pool;
pub mod round_robin;

use std::sync::Arc;
use url::Url;

use crate::load_balancer::backend::{Backend, BackendError};

pub use pool::BackendPool;
pub use round_robin::RoundRobin;

/// Strategy selecting one backend out of the current members.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// A set of candidate servers that attempts are dispatched to.
///
/// Implementations synchronize internally; every method takes `&self`.
pub trait BackendTarget: Send + Sync {
    /// Pick the backend for the next attempt, or `None` if there is none.
    fn select_next(&self) -> Option<Arc<Backend>>;

    /// Add a server, or keep it if the URL is already a member.
    fn upsert_server(&self, url: &Url) -> Result<(), BackendError>;

    /// Remove a server.
    fn remove_server(&self, url: &Url) -> Result<(), BackendError>;

    /// Current members, in rotation order.
    fn servers(&self) -> Vec<Url>;

    fn is_empty(&self) -> bool {
        self.servers().is_empty()
    }
}
