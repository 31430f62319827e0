//! Retry with replay.
//!
//! # Responsibilities
//! - Classify each request once (upgrade handshakes and unrewindable bodies
//!   get a single attempt)
//! - Buffer a rewindable body and replay it on every attempt
//! - Retry attempts that never reached a backend, up to the budget
//! - Settle exactly one attempt on the client sink
//!
//! # Attempt loop
//! ```text
//! Attempting(k) ── connectivity failure, nothing sent, k < max ──▶ Attempting(k+1)
//!      │                                                         (listeners notified with k)
//!      └── anything else ──▶ Committing ──▶ Done
//! ```
//!
//! # Design Decisions
//! - No backoff between attempts; the next attempt goes to the next backend
//! - Attempts are strictly sequential
//! - A status written by a handler is delivered as-is, even a 5xx
//! - On an exhausted budget the last failure's own status is delivered

use axum::body::Body;
use axum::http::{request::Parts, Request, StatusCode};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::http::handler::{ClientSink, Handler};
use crate::observability::metrics;
use crate::resilience::eligibility::{classify, Eligibility};
use crate::resilience::failure::ServeError;
use crate::resilience::interceptor::ResponseInterceptor;
use crate::resilience::listeners::{RetryListener, RetryListeners};

/// Largest request body buffered for replay unless configured otherwise.
pub const DEFAULT_REPLAY_LIMIT: usize = 1024 * 1024;

/// Raised at construction for a budget allowing no attempt at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("max attempts must be at least 1, got {0}")]
pub struct InvalidRetryBudget(pub usize);

/// Attempts allowed and used for one request.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    max_attempts: NonZeroUsize,
    attempts_used: usize,
}

impl RetryBudget {
    pub fn new(max_attempts: NonZeroUsize) -> Self {
        Self {
            max_attempts,
            attempts_used: 0,
        }
    }

    /// Start the next attempt and return its 1-based number.
    fn begin_attempt(&mut self) -> usize {
        debug_assert!(self.attempts_used < self.max_attempts.get());
        self.attempts_used += 1;
        self.attempts_used
    }

    pub fn has_remaining(&self) -> bool {
        self.attempts_used < self.max_attempts.get()
    }

    pub fn attempts_used(&self) -> usize {
        self.attempts_used
    }
}

/// How a request ended, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Delivered(StatusCode),
    Aborted,
    ClientGone,
}

impl Settled {
    /// `status` label for the request metrics. Abandoned requests are not
    /// counted.
    fn status_label(&self) -> Option<String> {
        match self {
            Settled::Delivered(status) => Some(status.as_u16().to_string()),
            Settled::Aborted => Some("aborted".to_owned()),
            Settled::ClientGone => None,
        }
    }
}

/// Retry middleware in front of a handler.
pub struct Retry {
    max_attempts: NonZeroUsize,
    next: Arc<dyn Handler>,
    listeners: RetryListeners,
    replay_limit: usize,
}

impl Retry {
    pub fn new(
        max_attempts: usize,
        next: Arc<dyn Handler>,
        listeners: RetryListeners,
    ) -> Result<Self, InvalidRetryBudget> {
        let max_attempts =
            NonZeroUsize::new(max_attempts).ok_or(InvalidRetryBudget(max_attempts))?;
        Ok(Self {
            max_attempts,
            next,
            listeners,
            replay_limit: DEFAULT_REPLAY_LIMIT,
        })
    }

    /// Largest request body, in bytes, buffered so it can be replayed.
    pub fn with_replay_limit(mut self, limit: usize) -> Self {
        self.replay_limit = limit;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts.get()
    }

    /// Serve one inbound request into `sink`.
    pub async fn serve<S: ClientSink>(&self, req: Request<Body>, sink: &mut S) {
        let start = Instant::now();
        let method = req.method().clone();
        let mut disconnected = sink.disconnected();

        let eligibility = classify(&req, self.replay_limit);
        let (settled, attempts) = match eligibility {
            Eligibility::Retryable if self.max_attempts.get() > 1 => {
                self.serve_with_retries(req, sink, &mut disconnected).await
            }
            Eligibility::NonRetryable(reason) => {
                tracing::debug!(?reason, "Request not retryable, single attempt");
                (self.pass_through(req, sink, &mut disconnected).await, 1)
            }
            Eligibility::Retryable => (self.pass_through(req, sink, &mut disconnected).await, 1),
        };

        match settled {
            Settled::Delivered(status) => {
                tracing::debug!(status = %status, attempts, "Request settled");
            }
            Settled::Aborted => {
                tracing::warn!(attempts, "Response aborted after streaming began");
            }
            Settled::ClientGone => {
                tracing::debug!(attempts, "Client went away, request abandoned");
            }
        }
        if let Some(status) = settled.status_label() {
            metrics::record_request(method.as_str(), &status, attempts, start);
        }
    }

    async fn pass_through<S: ClientSink>(
        &self,
        req: Request<Body>,
        sink: &mut S,
        disconnected: &mut BoxFuture<'static, ()>,
    ) -> Settled {
        let result = tokio::select! {
            biased;
            _ = disconnected => return Settled::ClientGone,
            result = self.next.serve(req, &mut *sink) => result,
        };
        deliver(sink, result).await
    }

    async fn serve_with_retries<S: ClientSink>(
        &self,
        req: Request<Body>,
        sink: &mut S,
        disconnected: &mut BoxFuture<'static, ()>,
    ) -> (Settled, usize) {
        let (parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, self.replay_limit).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to buffer request body for replay");
                sink.set_status(StatusCode::BAD_REQUEST);
                return (deliver(sink, Ok(())).await, 0);
            }
        };

        let mut budget = RetryBudget::new(self.max_attempts);
        loop {
            let attempt = budget.begin_attempt();
            let req = replay(&parts, &body);
            let mut interceptor = ResponseInterceptor::new(&mut *sink);

            let result = tokio::select! {
                biased;
                _ = &mut *disconnected => return (Settled::ClientGone, attempt),
                result = self.next.serve(req, &mut interceptor) => result,
            };

            let outcome = interceptor.outcome(&result);
            if outcome.transport_failure && budget.has_remaining() {
                if let Err(err) = &result {
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts.get(),
                        error = %err,
                        "Backend unreachable, retrying"
                    );
                }
                self.listeners.retried(&parts, attempt);
                continue;
            }

            if outcome.transport_failure {
                tracing::warn!(
                    attempts = attempt,
                    status = %outcome.status,
                    "Retry budget exhausted, delivering last failure"
                );
            }
            let sink = interceptor.commit();
            return (deliver(sink, result).await, budget.attempts_used());
        }
    }
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("max_attempts", &self.max_attempts)
            .field("listeners", &self.listeners)
            .field("replay_limit", &self.replay_limit)
            .finish()
    }
}

fn replay(parts: &Parts, body: &Bytes) -> Request<Body> {
    Request::from_parts(parts.clone(), Body::from(body.clone()))
}

/// Settle the committed attempt on the client sink.
async fn deliver<S: ClientSink>(sink: &mut S, result: Result<(), ServeError>) -> Settled {
    let finished = match result {
        Ok(()) => sink.finish().await,
        Err(ServeError::Connectivity(failure)) if sink.committed_status().is_none() => {
            sink.set_status(failure.status());
            sink.finish().await
        }
        Err(err) => {
            sink.abort(err.into()).await;
            return Settled::Aborted;
        }
    };

    match (finished, sink.committed_status()) {
        (Ok(()), Some(status)) => Settled::Delivered(status),
        _ => Settled::ClientGone,
    }
}
