//! Contracts between the retry layer, the handlers it drives and the client.
//!
//! A [`Handler`] produces a response by driving a [`ResponseWriter`]: it
//! records a status and headers, then writes body chunks. The first write
//! commits the head. The writer handed to a handler is either the client's
//! [`ClientSink`] itself or a per-attempt interceptor wrapping it.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::resilience::failure::{BoxError, ServeError};

/// The client can no longer receive the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client connection closed")]
pub struct ClientGone;

/// Streaming response writer.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Record the response status. Has no effect once the head is committed.
    fn set_status(&mut self, status: StatusCode);

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Write a body chunk, committing the head first if needed.
    async fn write(&mut self, chunk: Bytes) -> Result<(), ClientGone>;

    async fn flush(&mut self) -> Result<(), ClientGone>;
}

/// The real response going back to the client.
#[async_trait]
pub trait ClientSink: ResponseWriter {
    /// Status of the committed head, `None` while nothing has been sent.
    fn committed_status(&self) -> Option<StatusCode>;

    /// Commit the head if nothing was written yet, then end the body.
    async fn finish(&mut self) -> Result<(), ClientGone>;

    /// Tear the response down so the client sees it as incomplete.
    async fn abort(&mut self, reason: BoxError);

    /// Resolves once the client has gone away.
    fn disconnected(&self) -> BoxFuture<'static, ()>;
}

/// A request handler: the load-balanced forwarder, a fallback responder or a
/// test double.
///
/// `Ok(())` means whatever the handler wanted to say went through the writer.
/// A handler signals that the request never reached an application by
/// returning [`ServeError::Connectivity`] instead of writing a status.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve(
        &self,
        req: Request<Body>,
        rw: &mut dyn ResponseWriter,
    ) -> Result<(), ServeError>;
}
