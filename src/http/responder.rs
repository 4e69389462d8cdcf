//! Observing response decorator.
//!
//! # Responsibilities
//! - Pass every response operation through to the real sink
//! - Record the status and count body bytes on the way
//! - Emit the request's access record exactly once
//! - Report abnormal termination to the log, and to the client while it can
//!   still be told
//!
//! # Status Lifecycle
//! ```text
//! Unset ──write_header / first write (200)──▶ Set(code) ──report_error──▶ Set(code')
//! ```

use std::error::Error;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use hyper::upgrade::OnUpgrade;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::access_log::{format_record, quote, Outcome, RequestMeta, SharedLogSink, NO_RATIO};
use crate::http::sink::{Hijack, HijackError, ResponseSink};

/// Response sink handed to downstream handlers in place of the real one.
pub struct ObservingResponder<S> {
    inner: S,
    meta: RequestMeta,
    log_sink: SharedLogSink,
    status: Option<StatusCode>,
    bytes_produced: u64,
    bytes_sent: u64,
    logged: bool,
}

impl<S: ResponseSink> ObservingResponder<S> {
    pub fn new(inner: S, meta: RequestMeta, log_sink: SharedLogSink) -> Self {
        Self {
            inner,
            meta,
            log_sink,
            status: None,
            bytes_produced: 0,
            bytes_sent: 0,
            logged: false,
        }
    }

    /// Recorded status, `None` until the handler produced a response.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Status as printed in the access record, `0` when unset.
    pub fn status_code(&self) -> u16 {
        self.status.map_or(0, |s| s.as_u16())
    }

    /// Bytes the real sink accepted from the handler, before any
    /// transformation. A short write counts only what was accepted; the rest
    /// is counted when the handler retries it.
    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }

    /// Bytes the real sink put on the wire.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Whether the access record has been emitted.
    pub fn is_logged(&self) -> bool {
        self.logged
    }

    pub fn request(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Produced-to-sent ratio with two decimals, or [`NO_RATIO`].
    ///
    /// Values above `1.00` mean the body shrank on the wire. A ratio that
    /// renders as `0.00` carries no signal and is reported as [`NO_RATIO`].
    pub fn compression_ratio(&self) -> String {
        if self.bytes_sent == 0 || self.bytes_produced == 0 || self.bytes_produced == self.bytes_sent
        {
            return NO_RATIO.to_string();
        }
        let ratio = format!("{:.2}", self.bytes_produced as f64 / self.bytes_sent as f64);
        if ratio == "0.00" {
            return NO_RATIO.to_string();
        }
        ratio
    }

    /// Emit the access record. Only the first call per request writes anything.
    pub fn log_now(
        &mut self,
        status: u16,
        duration: Duration,
        bytes: u64,
        ratio: &str,
        message: &str,
    ) {
        if self.logged {
            return;
        }
        self.logged = true;

        let record = format_record(
            &self.meta,
            &Outcome {
                status,
                duration,
                bytes,
                ratio,
                message,
            },
        );
        tracing::debug!(
            method = %self.meta.method,
            uri = %self.meta.uri,
            status,
            bytes,
            "access record"
        );
        if let Err(e) = self.log_sink.append(record.as_bytes()) {
            tracing::warn!(error = %e, "failed to write access record");
        }
    }

    /// Report a failure that ends the request abnormally.
    ///
    /// The innermost cause of `err` is logged and becomes the message. If no
    /// body bytes reached the client yet, a plain-text error response with
    /// `status` is sent as well; otherwise the response already on the wire is
    /// left alone and only the access record shows the failure.
    pub async fn report_error(
        &mut self,
        status: StatusCode,
        err: &(dyn Error + Send + Sync + 'static),
    ) {
        let message = root_cause(err).to_string();
        self.log_now(status.as_u16(), Duration::ZERO, 0, NO_RATIO, &message);
        self.status = Some(status);

        if self.bytes_sent == 0 {
            if let Err(e) = write_error(&mut self.inner, status, &quote(&message)).await {
                tracing::debug!(error = %e, "failed to send error response");
            }
        }
    }

    /// Take over the raw connection, if the real sink supports it.
    pub fn try_upgrade(&mut self) -> Result<OnUpgrade, HijackError> {
        match self.inner.hijacker() {
            Some(hijacker) => hijacker.hijack(),
            None => Err(HijackError::NotSupported),
        }
    }

    fn record_written(&mut self, n: usize) {
        self.bytes_produced += n as u64;
        self.bytes_sent = match self.inner.bytes_on_wire() {
            Some(on_wire) => on_wire,
            None => self.bytes_sent + n as u64,
        };
    }
}

/// Walk an error's `source` chain to its innermost cause.
pub fn root_cause<'a>(err: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current
}

/// Write a plain-text error response directly to the real sink.
async fn write_error<S: ResponseSink>(
    sink: &mut S,
    status: StatusCode,
    body: &str,
) -> io::Result<()> {
    let headers = sink.headers_mut();
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    sink.write_header(status);
    sink.write_all(body.as_bytes()).await?;
    sink.write_all(b"\n").await?;
    sink.flush().await
}

impl<S: ResponseSink> ResponseSink for ObservingResponder<S> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status = Some(status);
        self.inner.write_header(status);
    }

    fn bytes_on_wire(&self) -> Option<u64> {
        Some(self.bytes_sent)
    }

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        self.inner.hijacker()
    }
}

impl<S: ResponseSink> AsyncWrite for ObservingResponder<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if this.status.is_none() {
            this.status = Some(StatusCode::OK);
        }
        match ready!(Pin::new(&mut this.inner).poll_write(cx, buf)) {
            Ok(n) => {
                this.record_written(n);
                Poll::Ready(Ok(n))
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
