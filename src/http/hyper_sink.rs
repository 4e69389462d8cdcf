//! Streaming response sink for hyper-served requests.
//!
//! # Data Flow
//! ```text
//! handler task                           service future
//!     write_header / first write  ──head──▶  PendingResponse::into_response
//!     poll_write                  ──body──▶  Body::from_stream
//!     drop                        ──(end of body)
//! ```
//!
//! # Design Decisions
//! - The head travels on a oneshot so the service can answer as soon as the
//!   handler commits a status, while the body keeps streaming
//! - The body channel is bounded, so a slow client backpressures the handler
//! - A handler that finishes without writing gets an empty `200 OK`, unless it
//!   is unwinding from a panic
//! - A panic after the head went out aborts the body stream

use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::Sink;
use hyper::upgrade::OnUpgrade;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

use crate::http::sink::{Hijack, HijackError, ResponseSink};

/// Body chunks buffered between the handler and hyper.
const BODY_CHANNEL_CAPACITY: usize = 8;

type Chunk = Result<Bytes, io::Error>;

/// Committed status and headers.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Sink half of a streamed hyper response, owned by the handler task.
#[derive(Debug)]
pub struct HyperSink {
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::Sender<Chunk>,
    upgradable: bool,
    on_upgrade: Option<OnUpgrade>,
}

/// Service half of a streamed hyper response.
#[derive(Debug)]
pub struct PendingResponse {
    head_rx: oneshot::Receiver<ResponseHead>,
    body_rx: mpsc::Receiver<Chunk>,
}

impl HyperSink {
    /// Create a sink for `req`, taking its upgrade handle if hyper provided one.
    pub fn new<B>(req: &mut Request<B>) -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let on_upgrade = req.extensions_mut().remove::<OnUpgrade>();

        let sink = Self {
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx,
            upgradable: on_upgrade.is_some(),
            on_upgrade,
        };
        (sink, PendingResponse { head_rx, body_rx })
    }

    fn commit(&mut self, status: StatusCode) {
        match self.head_tx.take() {
            Some(tx) => {
                let head = ResponseHead {
                    status,
                    headers: mem::take(&mut self.headers),
                };
                // The receiver is gone when the client went away; writes will
                // report it.
                let _ = tx.send(head);
            }
            None => tracing::debug!(status = %status, "superfluous write_header call"),
        }
    }
}

impl PendingResponse {
    /// Wait for the handler to commit a head and build the response.
    ///
    /// Returns `None` if the sink was dropped without committing, which only
    /// happens when the handler panicked.
    pub async fn into_response(self) -> Option<Response<Body>> {
        let head = self.head_rx.await.ok()?;
        let body = if head.status == StatusCode::SWITCHING_PROTOCOLS {
            Body::empty()
        } else {
            Body::from_stream(self.body_rx)
        };
        let mut response = Response::new(body);
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        Some(response)
    }
}

impl ResponseSink for HyperSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.commit(status);
    }

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        if self.upgradable {
            Some(self)
        } else {
            None
        }
    }
}

impl Hijack for HyperSink {
    fn hijack(&mut self) -> Result<OnUpgrade, HijackError> {
        self.on_upgrade.take().ok_or(HijackError::AlreadyHijacked)
    }
}

impl AsyncWrite for HyperSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.head_tx.is_some() {
            self.commit(StatusCode::OK);
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "response body closed");
        match Pin::new(&mut self.body_tx).poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(_)) => return Poll::Ready(Err(closed())),
            Poll::Pending => return Poll::Pending,
        }
        Pin::new(&mut self.body_tx)
            .start_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.body_tx.close_channel();
        Poll::Ready(Ok(()))
    }
}

impl Drop for HyperSink {
    fn drop(&mut self) {
        match (self.head_tx.is_some(), std::thread::panicking()) {
            (true, false) => self.commit(StatusCode::OK),
            // Head already sent: fail the body so the client sees a broken
            // response rather than a short one.
            (false, true) => {
                let _ = self
                    .body_tx
                    .try_send(Err(io::Error::other("request handler panicked")));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn streams_head_and_body() {
        let mut req = Request::new(());
        let (mut sink, pending) = HyperSink::new(&mut req);

        let writer = tokio::spawn(async move {
            sink.headers_mut()
                .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
            sink.write_header(StatusCode::CREATED);
            sink.write_all(b"hello ").await.unwrap();
            sink.write_all(b"world").await.unwrap();
        });

        let response = pending.into_response().await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello world");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_without_writing_is_empty_ok() {
        let mut req = Request::new(());
        let (sink, pending) = HyperSink::new(&mut req);
        drop(sink);

        let response = pending.into_response().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn write_fails_after_client_gone() {
        let mut req = Request::new(());
        let (mut sink, pending) = HyperSink::new(&mut req);
        drop(pending);

        let err = sink.write_all(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn plain_request_is_not_upgradable() {
        let mut req = Request::new(());
        let (mut sink, _pending) = HyperSink::new(&mut req);
        assert!(sink.hijacker().is_none());
    }
}
