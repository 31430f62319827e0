//! Per-attempt response interception.
//!
//! The interceptor stands in for the client sink during one attempt. Status
//! and headers are held back until the handler writes its first body byte;
//! from then on the attempt is committed and everything streams straight to
//! the client. Nothing of the body is ever buffered.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use std::mem;

use crate::http::handler::{ClientGone, ClientSink, ResponseWriter};
use crate::resilience::failure::ServeError;

/// What one attempt amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub status: StatusCode,
    pub first_byte_sent: bool,
    /// The attempt never reached an application and nothing was sent, so it
    /// can be replayed.
    pub transport_failure: bool,
}

/// Response writer wrapping the client sink for exactly one attempt.
pub struct ResponseInterceptor<'a, S: ClientSink> {
    sink: &'a mut S,
    status: StatusCode,
    headers: HeaderMap,
    first_byte_sent: bool,
}

impl<'a, S: ClientSink> ResponseInterceptor<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            first_byte_sent: false,
        }
    }

    pub fn first_byte_sent(&self) -> bool {
        self.first_byte_sent
    }

    pub fn outcome(&self, result: &Result<(), ServeError>) -> AttemptOutcome {
        let status = match result {
            Err(ServeError::Connectivity(failure)) if !self.first_byte_sent => failure.status(),
            _ => self.status,
        };
        AttemptOutcome {
            status,
            first_byte_sent: self.first_byte_sent,
            transport_failure: !self.first_byte_sent
                && matches!(result, Err(ServeError::Connectivity(_))),
        }
    }

    /// Promote this attempt: hand the recorded head to the sink if it has not
    /// gone out yet and give the sink back.
    pub fn commit(self) -> &'a mut S {
        if !self.first_byte_sent {
            self.sink.set_status(self.status);
            *self.sink.headers_mut() = self.headers;
        }
        self.sink
    }

    fn send_head(&mut self) {
        if !self.first_byte_sent {
            self.sink.set_status(self.status);
            *self.sink.headers_mut() = mem::take(&mut self.headers);
            self.first_byte_sent = true;
        }
    }
}

#[async_trait]
impl<'a, S: ClientSink> ResponseWriter for ResponseInterceptor<'a, S> {
    fn set_status(&mut self, status: StatusCode) {
        if !self.first_byte_sent {
            self.status = status;
        }
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), ClientGone> {
        self.send_head();
        self.sink.write(chunk).await
    }

    async fn flush(&mut self) -> Result<(), ClientGone> {
        if self.first_byte_sent {
            self.sink.flush().await
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::sink::testing::{RecordingSink, SinkEvent};
    use crate::resilience::failure::ConnectivityFailure;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn holds_status_until_first_write() {
        let mut sink = RecordingSink::new();
        let mut rw = ResponseInterceptor::new(&mut sink);

        rw.set_status(StatusCode::ACCEPTED);
        rw.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        rw.flush().await.unwrap();
        assert!(!rw.first_byte_sent());

        rw.write(Bytes::from_static(b"hello")).await.unwrap();
        assert!(rw.first_byte_sent());
        rw.flush().await.unwrap();

        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Head(StatusCode::ACCEPTED),
                SinkEvent::Data(Bytes::from_static(b"hello")),
                SinkEvent::Flush,
            ]
        );
        assert_eq!(sink.committed_headers[CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn status_changes_after_first_byte_are_ignored() {
        let mut sink = RecordingSink::new();
        let mut rw = ResponseInterceptor::new(&mut sink);

        rw.write(Bytes::from_static(b"a")).await.unwrap();
        rw.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        rw.write(Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(sink.committed, Some(StatusCode::OK));
        assert_eq!(sink.body_str(), "ab");
    }

    #[tokio::test]
    async fn connectivity_failure_before_first_byte_is_retryable() {
        let mut sink = RecordingSink::new();
        let rw = ResponseInterceptor::new(&mut sink);

        let result = Err(ConnectivityFailure::new(StatusCode::BAD_GATEWAY, "refused").into());
        let outcome = rw.outcome(&result);

        assert!(outcome.transport_failure);
        assert_eq!(outcome.status, StatusCode::BAD_GATEWAY);
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn connectivity_failure_after_first_byte_is_not_retryable() {
        let mut sink = RecordingSink::new();
        let mut rw = ResponseInterceptor::new(&mut sink);

        rw.write(Bytes::from_static(b"partial")).await.unwrap();
        let result = Err(ConnectivityFailure::new(StatusCode::BAD_GATEWAY, "reset").into());
        let outcome = rw.outcome(&result);

        assert!(!outcome.transport_failure);
        assert!(outcome.first_byte_sent);
        assert_eq!(outcome.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn application_status_is_not_a_transport_failure() {
        let mut sink = RecordingSink::new();
        let mut rw = ResponseInterceptor::new(&mut sink);

        rw.set_status(StatusCode::SERVICE_UNAVAILABLE);
        let outcome = rw.outcome(&Ok(()));

        assert!(!outcome.transport_failure);
        assert_eq!(outcome.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn commit_hands_over_recorded_head() {
        let mut sink = RecordingSink::new();
        let mut rw = ResponseInterceptor::new(&mut sink);
        rw.set_status(StatusCode::NO_CONTENT);
        rw.headers_mut()
            .insert("x-backend", HeaderValue::from_static("b1"));

        let sink = rw.commit();
        sink.finish().await.unwrap();

        assert_eq!(sink.committed, Some(StatusCode::NO_CONTENT));
        assert_eq!(sink.committed_headers["x-backend"], "b1");
    }
}
