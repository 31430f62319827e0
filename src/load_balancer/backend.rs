//! Backend abstraction.
//!
//! A backend is identified by its URL. The scheme and authority used to
//! rewrite outgoing request URIs are parsed once, when the backend joins the
//! pool.

use axum::http::uri::{Authority, Scheme};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Errors raised while managing backend membership.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("backend {0} is not a member of the pool")]
    NotFound(Url),
}

/// A single backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// The URL this backend was registered with.
    pub url: Url,
    scheme: Scheme,
    authority: Authority,
}

impl Backend {
    /// Parse a backend from its URL. Only plain `http` is supported; TLS to
    /// backends is the transport's concern.
    pub fn new(url: Url) -> Result<Self, BackendError> {
        let invalid = |reason: &str| BackendError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        if url.scheme() != "http" {
            return Err(invalid("only the http scheme is supported"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        let authority = Authority::from_str(&format!("{host}:{port}"))
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            url,
            scheme: Scheme::HTTP,
            authority,
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_authority_with_default_port() {
        let backend = Backend::new(Url::parse("http://backend.internal").unwrap()).unwrap();
        assert_eq!(backend.authority().as_str(), "backend.internal:80");
        assert_eq!(backend.scheme(), &Scheme::HTTP);
    }

    #[test]
    fn keeps_explicit_port() {
        let backend = Backend::new(Url::parse("http://127.0.0.1:3000/").unwrap()).unwrap();
        assert_eq!(backend.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn rejects_https() {
        let err = Backend::new(Url::parse("https://127.0.0.1:3000").unwrap()).unwrap_err();
        assert!(matches!(err, BackendError::InvalidUrl { .. }));
    }
}
