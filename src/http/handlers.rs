//! Demo downstream handler served by the binary.
//!
//! - `GET /` answers with a short greeting
//! - `GET /echo` with an `Upgrade` header switches protocols and echoes every
//!   byte the client sends on the raw connection
//! - anything else is reported through the responder's error path

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::http::logger::Handler;
use crate::http::responder::ObservingResponder;
use crate::http::sink::ResponseSink;

const GREETING: &[u8] = b"request-logger is up\n";

#[derive(Debug, Error)]
enum DemoError {
    #[error("no route for {0}")]
    NotFound(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("echo needs an Upgrade header")]
    MissingUpgrade,
}

/// Handler behind the demo server.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoHandler;

impl<S: ResponseSink> Handler<S> for DemoHandler {
    async fn serve(&self, req: Request<Body>, res: &mut ObservingResponder<S>) {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match (&method, path.as_str()) {
            (&Method::GET, "/") => {
                res.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                if let Err(e) = res.write_all(GREETING).await {
                    tracing::debug!(error = %e, "client went away");
                }
            }
            (&Method::GET, "/echo") => echo(req, res).await,
            (_, "/" | "/echo") => {
                let err = DemoError::MethodNotAllowed(method.clone());
                res.report_error(StatusCode::METHOD_NOT_ALLOWED, &err).await;
            }
            _ => {
                res.report_error(StatusCode::NOT_FOUND, &DemoError::NotFound(path.clone())).await;
            }
        }
    }
}

async fn echo<S: ResponseSink>(req: Request<Body>, res: &mut ObservingResponder<S>) {
    let Some(protocol) = req.headers().get(header::UPGRADE).cloned() else {
        res.report_error(StatusCode::UPGRADE_REQUIRED, &DemoError::MissingUpgrade).await;
        return;
    };

    let on_upgrade = match res.try_upgrade() {
        Ok(on_upgrade) => on_upgrade,
        Err(e) => {
            res.report_error(StatusCode::NOT_IMPLEMENTED, &e).await;
            return;
        }
    };

    let headers = res.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, protocol);
    res.write_header(StatusCode::SWITCHING_PROTOCOLS);

    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::warn!(error = %e, "connection upgrade failed");
            return;
        }
    };

    let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => tracing::debug!(bytes = n, "echo session finished"),
        Err(e) => tracing::debug!(error = %e, "echo session aborted"),
    }
}
