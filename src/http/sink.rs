//! Response sink abstraction.
//!
//! # Responsibilities
//! - Describe what a handler can do to a response: set headers, commit a
//!   status, stream bytes
//! - Expose connection hijacking as an optional capability, probed at runtime
//! - Provide an in-memory sink for buffered responses
//!
//! # Design Decisions
//! - Byte writes go through `tokio::io::AsyncWrite`, so handlers use the
//!   ordinary `AsyncWriteExt` helpers
//! - The first byte write commits a `200 OK` head if none was written
//! - Headers changed after the head is committed have no effect

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Errors returned when taking over the raw connection.
#[derive(Debug, Error)]
pub enum HijackError {
    #[error("connection upgrade not supported")]
    NotSupported,

    #[error("connection already hijacked")]
    AlreadyHijacked,
}

/// Capability to hand the raw transport connection to the caller.
///
/// The returned [`OnUpgrade`] resolves to the upgraded connection once the
/// `101 Switching Protocols` head has been flushed to the client. The
/// connection can be downcast into its IO object plus any bytes already read
/// ahead from it.
pub trait Hijack {
    fn hijack(&mut self) -> Result<OnUpgrade, HijackError>;
}

/// A transport-facing response writer.
pub trait ResponseSink: AsyncWrite + Send + Unpin {
    /// Headers to send with the response head.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the response status. Calls after the first are ignored by the
    /// transport.
    fn write_header(&mut self, status: StatusCode);

    /// Bytes actually put on the wire, when the sink transforms the body
    /// (e.g. compresses it). `None` means every accepted byte is sent as is.
    fn bytes_on_wire(&self) -> Option<u64> {
        None
    }

    /// Probe for the hijack capability.
    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        None
    }
}

/// Sink that keeps the whole response in memory.
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Convert into an HTTP response; an uncommitted status becomes `200 OK`.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for BufferedSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }
}

impl AsyncWrite for BufferedSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.write_header(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
