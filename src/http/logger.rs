//! Request logging middleware.
//!
//! # Responsibilities
//! - Wrap the real response sink in an [`ObservingResponder`] per request
//! - Time the downstream handler
//! - Emit the access record on every exit path: return, panic, or the
//!   handler future being dropped
//! - Serve as a tower `Service` so it can be mounted in an axum router
//!
//! # Design Decisions
//! - Finalization lives in a drop guard, so unwinding and cancellation are
//!   covered the same way as a normal return
//! - Each request runs on its own task; the service future only waits for the
//!   response head and streams the body from the task
//! - The task is aborted when the service future or the response body is
//!   dropped before the handler finishes, so the record still gets written.
//!   Upgraded connections detach the task, since it outlives the response
//! - Logging never fails a request

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, BodyDataStream};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::task::{JoinError, JoinHandle};
use tower::Service;

use crate::access_log::{RequestMeta, SharedLogSink};
use crate::http::hyper_sink::HyperSink;
use crate::http::responder::ObservingResponder;
use crate::http::sink::ResponseSink;

/// Downstream request handler.
///
/// Handlers write their response through the responder and may call
/// [`ObservingResponder::report_error`] to end the request abnormally.
pub trait Handler<S>: Send + Sync + 'static {
    fn serve(
        &self,
        req: Request<Body>,
        res: &mut ObservingResponder<S>,
    ) -> impl Future<Output = ()> + Send;
}

/// Middleware that writes one access record per request handled by `H`.
pub struct RequestLogger<H> {
    handler: Arc<H>,
    log_sink: SharedLogSink,
}

impl<H> Clone for RequestLogger<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            log_sink: Arc::clone(&self.log_sink),
        }
    }
}

impl<H> RequestLogger<H> {
    pub fn new(handler: H, log_sink: SharedLogSink) -> Self {
        Self {
            handler: Arc::new(handler),
            log_sink,
        }
    }

    /// Run the handler for `req`, writing its response to `sink`.
    ///
    /// The access record has been written when this returns, and also when
    /// the returned future is dropped early or the handler panics.
    pub async fn serve<S>(&self, req: Request<Body>, sink: S)
    where
        S: ResponseSink,
        H: Handler<S>,
    {
        let meta = RequestMeta::from_request(&req);
        let mut guard = LogOnDrop {
            responder: ObservingResponder::new(sink, meta, Arc::clone(&self.log_sink)),
            start: Instant::now(),
        };
        self.handler.serve(req, &mut guard.responder).await;
    }
}

/// Writes the final access record when the request scope ends.
struct LogOnDrop<S: ResponseSink> {
    responder: ObservingResponder<S>,
    start: Instant,
}

impl<S: ResponseSink> Drop for LogOnDrop<S> {
    fn drop(&mut self) {
        let res = &mut self.responder;
        let ratio = res.compression_ratio();
        let (status, bytes) = (res.status_code(), res.bytes_sent());
        res.log_now(status, self.start.elapsed(), bytes, &ratio, "");
    }
}

/// Handler task that is aborted when dropped, unless detached.
struct HandlerTask(Option<JoinHandle<()>>);

impl HandlerTask {
    fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(Some(tokio::spawn(fut)))
    }

    /// Let the task run to completion on its own.
    fn detach(mut self) {
        self.0.take();
    }

    async fn join(&mut self) -> Result<(), JoinError> {
        match self.0.as_mut() {
            Some(handle) => handle.await,
            None => Ok(()),
        }
    }
}

impl Drop for HandlerTask {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Response body that owns the handler task producing it.
struct TaskBody {
    inner: BodyDataStream,
    _task: HandlerTask,
}

impl Stream for TaskBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<H> Service<Request<Body>> for RequestLogger<H>
where
    H: Handler<HyperSink>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let logger = self.clone();
        Box::pin(async move {
            let (sink, pending) = HyperSink::new(&mut req);
            let mut task = HandlerTask::spawn(async move { logger.serve(req, sink).await });

            let Some(response) = pending.into_response().await else {
                // The sink went away without a head: the handler panicked.
                if let Err(e) = task.join().await {
                    tracing::error!(error = %e, "request handler failed");
                }
                return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            };

            if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                task.detach();
                return Ok(response);
            }
            let (parts, body) = response.into_parts();
            let body = Body::from_stream(TaskBody {
                inner: body.into_data_stream(),
                _task: task,
            });
            Ok(Response::from_parts(parts, body))
        })
    }
}
