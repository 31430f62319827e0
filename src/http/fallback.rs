//! Empty pool responder.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use std::sync::Arc;

use crate::http::handler::{Handler, ResponseWriter};
use crate::load_balancer::BackendTarget;
use crate::resilience::failure::ServeError;

/// Answers 503 through the normal response path while the target has no
/// members, and delegates to `next` otherwise.
///
/// The 503 is an application response, so the retry layer delivers it as-is.
pub struct EmptyBackendHandler {
    target: Arc<dyn BackendTarget>,
    next: Arc<dyn Handler>,
}

impl EmptyBackendHandler {
    pub fn new(target: Arc<dyn BackendTarget>, next: Arc<dyn Handler>) -> Self {
        Self { target, next }
    }
}

#[async_trait]
impl Handler for EmptyBackendHandler {
    async fn serve(
        &self,
        req: Request<Body>,
        rw: &mut dyn ResponseWriter,
    ) -> Result<(), ServeError> {
        if !self.target.is_empty() {
            return self.next.serve(req, rw).await;
        }

        tracing::warn!(uri = %req.uri(), "No backend in the pool");
        rw.set_status(StatusCode::SERVICE_UNAVAILABLE);
        rw.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        if rw
            .write(Bytes::from_static(b"Service Unavailable"))
            .await
            .is_err()
        {
            tracing::debug!("Client left before the 503 was written");
        }
        Ok(())
    }
}
