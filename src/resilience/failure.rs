//! Attempt failure classification.
//!
//! Two kinds of failure look alike if only a status code is inspected:
//! - a backend that could not be reached at all, reported by returning
//!   [`ConnectivityFailure`] from the handler;
//! - a handler that ran and wrote an error status through the writer.
//!
//! Only the first one is retried. The path a status travelled decides,
//! never its numeric value.

use axum::http::StatusCode;
use std::error::Error as StdError;
use std::io;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// No backend could be selected for the attempt.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("no backend available")]
pub struct NoBackend;

/// The attempt never reached an application handler.
#[derive(Debug, thiserror::Error)]
#[error("backend unreachable ({status}): {cause}")]
pub struct ConnectivityFailure {
    status: StatusCode,
    #[source]
    cause: BoxError,
}

impl ConnectivityFailure {
    pub fn new(status: StatusCode, cause: impl Into<BoxError>) -> Self {
        Self {
            status,
            cause: cause.into(),
        }
    }

    /// Map a failed connection attempt to its status: 504 when the connect
    /// timed out, 502 otherwise.
    pub fn from_connect_error(err: impl Into<BoxError>) -> Self {
        let cause = err.into();
        let status = if is_timeout(&*cause) {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self { status, cause }
    }

    pub fn no_backend() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, NoBackend)
    }

    /// Status delivered to the client when this is the final attempt.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Result of a failed attempt.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityFailure),

    /// The response broke off after the backend started answering.
    #[error("response interrupted: {0}")]
    Interrupted(#[source] BoxError),
}

impl ServeError {
    pub fn interrupted(err: impl Into<BoxError>) -> Self {
        Self::Interrupted(err.into())
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = err.source();
    }
    false
}
