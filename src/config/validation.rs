//! Configuration validation.
//!
//! Semantic checks only, serde handles syntax. Every problem is reported,
//! not just the first one.

use std::collections::HashSet;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("retries.max_attempts must be at least 1")]
    NoAttempts,

    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("timeouts.connect_secs must be greater than 0")]
    ZeroConnectTimeout,

    #[error("backend {name:?}: {reason}")]
    InvalidBackendUrl { name: String, reason: String },

    #[error("backend name {0:?} is used more than once")]
    DuplicateBackend(String),
}

/// Check a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::NoAttempts);
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    let mut names = HashSet::new();
    for backend in &config.backends {
        if !names.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        if let Err(reason) = check_backend_url(&backend.url) {
            errors.push(ValidationError::InvalidBackendUrl {
                name: backend.name.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_backend_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("{raw:?} is not a URL: {e}"))?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(format!("{raw:?} has no host"));
    }
    Ok(())
}
