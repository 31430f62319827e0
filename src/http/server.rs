//! HTTP server setup.
//!
//! # Responsibilities
//! - Assemble the handler chain: retry → empty pool responder → forwarder
//! - Wire up middleware (request ID, tracing)
//! - Serve on a listener until shutdown
//! - Reconcile pool membership when the configuration changes

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::fallback::EmptyBackendHandler;
use crate::http::forward::{Forwarder, LoadBalancedForwarder};
use crate::http::service::RetryService;
use crate::load_balancer::backend::BackendError;
use crate::load_balancer::{BackendPool, BackendTarget};
use crate::resilience::listeners::{
    MetricsListener, QueuedListener, RetryListener, RetryListeners,
};
use crate::resilience::retries::{InvalidRetryBudget, Retry};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid backend: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    RetryBudget(#[from] InvalidRetryBudget),
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    pool: Arc<BackendPool>,
}

impl HttpServer {
    /// Create a server from a validated configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServerError> {
        Self::with_listeners(config, Vec::new())
    }

    /// Like [`HttpServer::new`], with extra retry listeners notified after
    /// the metrics listener, in the given order.
    ///
    /// The extra listeners run on a [`QueuedListener`] task so they cannot
    /// hold up a response. When any are given this must be called within a
    /// tokio runtime.
    pub fn with_listeners(
        config: &ProxyConfig,
        extra: Vec<Arc<dyn RetryListener>>,
    ) -> Result<Self, ServerError> {
        let pool = Arc::new(BackendPool::from_urls(&config.backend_urls())?);
        let target: Arc<dyn BackendTarget> = pool.clone();

        let forwarder = LoadBalancedForwarder::new(target.clone(), Forwarder::new(&config.timeouts));
        let next = Arc::new(EmptyBackendHandler::new(target, Arc::new(forwarder)));

        let mut listeners = RetryListeners::new();
        listeners.push(Arc::new(MetricsListener));
        if !extra.is_empty() {
            let extra: RetryListeners = extra.into_iter().collect();
            listeners.push(Arc::new(QueuedListener::spawn(Arc::new(extra))));
        }

        let retry = Retry::new(config.retries.max_attempts, next, listeners)?
            .with_replay_limit(config.retries.max_replay_body_bytes);
        tracing::info!(
            max_attempts = retry.max_attempts(),
            backends = pool.servers().len(),
            "Retry layer ready"
        );

        let router = Self::build_router(RetryService::new(Arc::new(retry)));
        Ok(Self { router, pool })
    }

    fn build_router(service: RetryService) -> Router {
        Router::new()
            .fallback_service(service)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The backend pool requests are balanced over.
    pub fn pool(&self) -> Arc<BackendPool> {
        self.pool.clone()
    }

    /// Run the server until `shutdown` fires, applying backend changes from
    /// `config_updates` as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let pool = self.pool.clone();
        let reconciler = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                if let Err(e) = pool.reconcile(&config.backend_urls()) {
                    tracing::error!(error = %e, "Failed to apply backend changes");
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                tracing::info!("HTTP server draining");
            })
            .await;

        reconciler.abort();
        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
