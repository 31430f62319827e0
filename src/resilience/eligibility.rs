//! Per-request retry eligibility.
//!
//! A request can only be replayed when replaying it cannot corrupt anything:
//! - upgrade handshakes are never replayed, the connection may be hijacked
//!   by the time a failure surfaces;
//! - the body must be rewindable, so its length has to be known up front and
//!   fit in the replay buffer.
//!
//! The method is not considered. A connectivity failure means the request
//! never reached an application, whatever its method.

use axum::body::HttpBody;
use axum::http::Request;

use crate::http::headers::is_upgrade_request;

/// Why a request is served with a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// `Connection: upgrade` together with an `Upgrade` header.
    ProtocolUpgrade,
    /// Streaming body of unknown length.
    UnboundedBody,
    /// Body longer than the replay buffer.
    BodyTooLarge { length: u64, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Retryable,
    NonRetryable(Ineligible),
}

impl Eligibility {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Classify a request. `replay_limit` is the largest body, in bytes, that may
/// be buffered for replay.
pub fn classify<B: HttpBody>(req: &Request<B>, replay_limit: usize) -> Eligibility {
    if is_upgrade_request(req.headers()) {
        return Eligibility::NonRetryable(Ineligible::ProtocolUpgrade);
    }

    match req.body().size_hint().upper() {
        None => Eligibility::NonRetryable(Ineligible::UnboundedBody),
        Some(length) if length > replay_limit as u64 => {
            Eligibility::NonRetryable(Ineligible::BodyTooLarge {
                length,
                limit: replay_limit,
            })
        }
        Some(_) => Eligibility::Retryable,
    }
}
