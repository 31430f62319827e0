//! Channel-backed client sink.
//!
//! The retry layer runs in its own task and writes into a [`ChannelSink`].
//! The head travels over a oneshot channel, body chunks over a bounded mpsc
//! channel that feeds the streaming response body. [`PendingResponse`] is
//! the receiving half handed back to hyper.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream;
use std::mem;
use tokio::sync::{mpsc, oneshot, watch};

use crate::http::handler::{ClientGone, ClientSink, ResponseWriter};
use crate::resilience::failure::BoxError;

/// Body chunks buffered between the writer task and hyper.
const BODY_BUFFER: usize = 16;

type Frame = Result<Bytes, BoxError>;

struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

/// Writing half of a streamed client response.
pub struct ChannelSink {
    status: StatusCode,
    headers: HeaderMap,
    committed: Option<StatusCode>,
    head_tx: Option<oneshot::Sender<Head>>,
    body_tx: Option<mpsc::Sender<Frame>>,
    // Sender side lives in `PendingResponse` and then in the response body.
    client: watch::Receiver<()>,
}

/// Receiving half of a [`ChannelSink`].
pub struct PendingResponse {
    head_rx: oneshot::Receiver<Head>,
    body_rx: mpsc::Receiver<Frame>,
    alive: watch::Sender<()>,
}

impl ChannelSink {
    pub fn new() -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_BUFFER);
        let (alive, client) = watch::channel(());

        let sink = Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            committed: None,
            head_tx: Some(head_tx),
            body_tx: Some(body_tx),
            client,
        };
        let pending = PendingResponse {
            head_rx,
            body_rx,
            alive,
        };
        (sink, pending)
    }

    fn commit_head(&mut self) -> Result<(), ClientGone> {
        if let Some(tx) = self.head_tx.take() {
            self.committed = Some(self.status);
            let head = Head {
                status: self.status,
                headers: mem::take(&mut self.headers),
            };
            tx.send(head).map_err(|_| ClientGone)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseWriter for ChannelSink {
    fn set_status(&mut self, status: StatusCode) {
        if self.committed.is_none() {
            self.status = status;
        }
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), ClientGone> {
        self.commit_head()?;
        let tx = self.body_tx.as_ref().ok_or(ClientGone)?;
        tx.send(Ok(chunk)).await.map_err(|_| ClientGone)
    }

    /// Chunks are handed to hyper as soon as they are written, so flushing
    /// only has to get the head out.
    async fn flush(&mut self) -> Result<(), ClientGone> {
        self.commit_head()?;
        match &self.body_tx {
            Some(tx) if !tx.is_closed() => Ok(()),
            _ => Err(ClientGone),
        }
    }
}

#[async_trait]
impl ClientSink for ChannelSink {
    fn committed_status(&self) -> Option<StatusCode> {
        self.committed
    }

    async fn finish(&mut self) -> Result<(), ClientGone> {
        self.commit_head()?;
        self.body_tx.take();
        Ok(())
    }

    async fn abort(&mut self, reason: BoxError) {
        let tx = self.body_tx.take();
        if self.committed.is_some() {
            if let Some(tx) = tx {
                let _ = tx.send(Err(reason)).await;
            }
        } else {
            // Dropping the head sender makes the pending side answer 502.
            self.head_tx.take();
        }
    }

    fn disconnected(&self) -> BoxFuture<'static, ()> {
        let mut client = self.client.clone();
        Box::pin(async move {
            // Nothing is ever sent; `changed` fails once the sender is dropped.
            while client.changed().await.is_ok() {}
        })
    }
}

impl PendingResponse {
    /// Wait for the head and build a response streaming the body.
    pub async fn into_response(self) -> Response {
        let Self {
            head_rx,
            body_rx,
            alive,
        } = self;

        let Ok(head) = head_rx.await else {
            tracing::debug!("Response abandoned before the head was sent");
            return StatusCode::BAD_GATEWAY.into_response();
        };

        let body = stream::unfold((body_rx, alive), |(mut rx, alive)| async move {
            let frame = rx.recv().await?;
            Some((frame, (rx, alive)))
        });

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}
