//! Retry notification.
//!
//! Listeners observe executed retries; they never gate them. Each listener
//! keeps its own state.

use axum::http::request::Parts;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::observability::metrics;

/// Observer of retries.
pub trait RetryListener: Send + Sync {
    /// Called once per retry. `attempt` is the 1-based number of the attempt
    /// that just failed.
    fn retried(&self, req: &Parts, attempt: usize);
}

/// Ordered registry of listeners, notified synchronously in registration
/// order.
#[derive(Clone, Default)]
pub struct RetryListeners {
    listeners: Vec<Arc<dyn RetryListener>>,
}

impl RetryListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn RetryListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl FromIterator<Arc<dyn RetryListener>> for RetryListeners {
    fn from_iter<I: IntoIterator<Item = Arc<dyn RetryListener>>>(iter: I) -> Self {
        Self {
            listeners: iter.into_iter().collect(),
        }
    }
}

impl RetryListener for RetryListeners {
    fn retried(&self, req: &Parts, attempt: usize) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let notified = panic::catch_unwind(AssertUnwindSafe(|| listener.retried(req, attempt)));
            if notified.is_err() {
                tracing::warn!(listener = index, attempt, "Retry listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for RetryListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// Counts retries in `proxy_retries_total`.
#[derive(Debug, Default)]
pub struct MetricsListener;

impl RetryListener for MetricsListener {
    fn retried(&self, _req: &Parts, attempt: usize) {
        metrics::record_retry(attempt);
    }
}

/// Moves notification off the response path.
///
/// Events are queued to a dedicated task that calls the inner listener, so a
/// slow listener cannot hold up a request. The queue is FIFO; the inner
/// listener still sees retries in the order they happened.
#[derive(Debug, Clone)]
pub struct QueuedListener {
    tx: mpsc::UnboundedSender<(Parts, usize)>,
}

impl QueuedListener {
    /// Spawn the dispatch task. Must be called within a tokio runtime.
    pub fn spawn(inner: Arc<dyn RetryListener>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Parts, usize)>();
        // Wrapped so a panicking listener does not kill the dispatch task.
        let inner = RetryListeners::from_iter([inner]);
        tokio::spawn(async move {
            while let Some((parts, attempt)) = rx.recv().await {
                inner.retried(&parts, attempt);
            }
        });
        Self { tx }
    }
}

impl RetryListener for QueuedListener {
    fn retried(&self, req: &Parts, attempt: usize) {
        if self.tx.send((req.clone(), attempt)).is_err() {
            tracing::warn!(attempt, "Retry listener queue closed, dropping notification");
        }
    }
}
