//! Tower service running the retry layer for each inbound request.
//!
//! Each request gets its own task driving [`Retry::serve`] into a
//! [`ChannelSink`]; the returned future resolves once the response head is
//! known and the body then streams from the task. Dropping the response (the
//! client went away) cancels the task's in-flight attempt.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::Instrument;

use crate::http::sink::ChannelSink;
use crate::resilience::retries::Retry;

#[derive(Debug, Clone)]
pub struct RetryService {
    retry: Arc<Retry>,
}

impl RetryService {
    pub fn new(retry: Arc<Retry>) -> Self {
        Self { retry }
    }
}

impl Service<Request<Body>> for RetryService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let retry = self.retry.clone();
        let (mut sink, pending) = ChannelSink::new();

        tokio::spawn(
            async move {
                retry.serve(req, &mut sink).await;
            }
            .instrument(tracing::Span::current()),
        );

        Box::pin(async move { Ok(pending.into_response().await) })
    }
}
