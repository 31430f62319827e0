//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the current pool members in rotation order
//! - Apply the load balancing strategy to select a backend
//! - Accept membership changes while requests are in flight

use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

use crate::load_balancer::{
    backend::{Backend, BackendError},
    round_robin::RoundRobin,
    BackendTarget, LoadBalancer,
};

/// A dynamically sized pool of backends behind one selection strategy.
#[derive(Debug)]
pub struct BackendPool {
    backends: RwLock<Vec<Arc<Backend>>>,
    strategy: Box<dyn LoadBalancer>,
}

impl BackendPool {
    /// Create an empty round-robin pool.
    pub fn new() -> Self {
        Self::with_strategy(Box::new(RoundRobin::new()))
    }

    pub fn with_strategy(strategy: Box<dyn LoadBalancer>) -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            strategy,
        }
    }

    /// Create a round-robin pool from a list of URLs, keeping their order.
    pub fn from_urls<'a, I>(urls: I) -> Result<Self, BackendError>
    where
        I: IntoIterator<Item = &'a Url>,
    {
        let pool = Self::new();
        for url in urls {
            pool.upsert_server(url)?;
        }
        Ok(pool)
    }

    /// Bring membership in line with `desired`: missing URLs are added at the
    /// end of the rotation, URLs no longer wanted are removed.
    pub fn reconcile(&self, desired: &[Url]) -> Result<(), BackendError> {
        for url in self.servers() {
            if !desired.contains(&url) {
                self.remove_server(&url)?;
                tracing::info!(backend = %url, "Backend removed from pool");
            }
        }
        let current = self.servers();
        for url in desired {
            if !current.contains(url) {
                self.upsert_server(url)?;
                tracing::info!(backend = %url, "Backend added to pool");
            }
        }
        Ok(())
    }
}

impl Default for BackendPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendTarget for BackendPool {
    fn select_next(&self) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let selected = self.strategy.next_server(&backends);
        if selected.is_none() {
            tracing::debug!(backend_count = backends.len(), "No backend available in pool");
        }
        selected
    }

    fn upsert_server(&self, url: &Url) -> Result<(), BackendError> {
        let backend = Backend::new(url.clone())?;
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        if !backends.iter().any(|b| b.url == backend.url) {
            backends.push(Arc::new(backend));
        }
        Ok(())
    }

    fn remove_server(&self, url: &Url) -> Result<(), BackendError> {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        let index = backends
            .iter()
            .position(|b| &b.url == url)
            .ok_or_else(|| BackendError::NotFound(url.clone()))?;
        backends.remove(index);
        Ok(())
    }

    fn servers(&self) -> Vec<Url> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|b| b.url.clone())
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
