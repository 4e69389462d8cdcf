//! End-to-end tests of the logging middleware behind a real server.

use std::io;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use request_logger::http::{DemoHandler, Handler, ObservingResponder, ResponseSink};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::{client, fields, start_server};

#[derive(Debug, Error)]
#[error("upload failed")]
struct UploadFailed(#[source] DiskFull);

#[derive(Debug, Error)]
#[error("disk full")]
struct DiskFull(#[source] io::Error);

fn enospc() -> UploadFailed {
    UploadFailed(DiskFull(io::Error::other("ENOSPC")))
}

struct Hundred;

impl<S: ResponseSink> Handler<S> for Hundred {
    async fn serve(&self, _req: Request<Body>, res: &mut ObservingResponder<S>) {
        res.write_header(StatusCode::OK);
        res.write_all(&[b'a'; 100]).await.unwrap();
    }
}

struct FailsEarly;

impl<S: ResponseSink> Handler<S> for FailsEarly {
    async fn serve(&self, _req: Request<Body>, res: &mut ObservingResponder<S>) {
        res.report_error(StatusCode::INTERNAL_SERVER_ERROR, &enospc()).await;
    }
}

struct FailsLate;

impl<S: ResponseSink> Handler<S> for FailsLate {
    async fn serve(&self, _req: Request<Body>, res: &mut ObservingResponder<S>) {
        res.write_all(b"0123456789").await.unwrap();
        res.report_error(StatusCode::SERVICE_UNAVAILABLE, &enospc()).await;
    }
}

struct Panics;

impl<S: ResponseSink> Handler<S> for Panics {
    async fn serve(&self, req: Request<Body>, _res: &mut ObservingResponder<S>) {
        if req.uri().path() == "/boom" {
            panic!("handler exploded");
        }
    }
}

struct Silent;

impl<S: ResponseSink> Handler<S> for Silent {
    async fn serve(&self, _req: Request<Body>, _res: &mut ObservingResponder<S>) {}
}

#[tokio::test]
async fn logs_successful_request() {
    let server = start_server(Hundred).await;

    let res = client()
        .get(server.url("/x"))
        .header(header::USER_AGENT, "test-agent")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.bytes().await.unwrap().len(), 100);

    let lines = server.log.lines();
    assert_eq!(lines.len(), 1);
    let f = fields(&lines[0]);
    assert_eq!(f.len(), 10, "{}", lines[0]);
    assert_eq!(f[1], "127.0.0.1");
    assert_eq!(f[2], "GET");
    assert_eq!(f[3], "\"/x\"");
    assert_eq!(f[4], "200");
    assert!(f[5].parse::<u64>().is_ok());
    assert_eq!(f[6], "100");
    assert_eq!(f[7], "-");
    assert_eq!(f[8], "\"test-agent\"");
    assert_eq!(f[9], "\"\"");
}

#[tokio::test]
async fn error_before_body_reaches_client() {
    let server = start_server(FailsEarly).await;

    let res = client().get(server.url("/upload")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(
        res.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(res.text().await.unwrap(), "\"ENOSPC\"\n");

    let lines = server.log.lines();
    assert_eq!(lines.len(), 1);
    let f = fields(&lines[0]);
    assert_eq!(&f[4..8], &["500", "0", "0", "-"]);
    assert_eq!(f[9], "\"ENOSPC\"");
}

#[tokio::test]
async fn error_after_body_only_logged() {
    let server = start_server(FailsLate).await;

    let res = client().get(server.url("/stream")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "0123456789");

    let lines = server.log.lines();
    assert_eq!(lines.len(), 1);
    let f = fields(&lines[0]);
    assert_eq!(f[4], "503");
    assert_eq!(f[9], "\"ENOSPC\"");
}

#[tokio::test]
async fn panicking_handler_still_logged() {
    let server = start_server(Panics).await;

    let res = client().get(server.url("/boom")).send().await.unwrap();
    assert_eq!(res.status(), 500);

    let lines = server.log.lines();
    assert_eq!(lines.len(), 1);
    let f = fields(&lines[0]);
    assert_eq!(f[3], "\"/boom\"");
    assert_eq!(f[4], "0");
    assert_eq!(f[6], "0");
}

#[tokio::test]
async fn silent_handler_logs_status_zero() {
    let server = start_server(Silent).await;

    let res = client().get(server.url("/nothing")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.bytes().await.unwrap().is_empty());

    let lines = server.log.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(fields(&lines[0])[4], "0");
}

#[tokio::test]
async fn concurrent_requests_log_whole_lines() {
    let server = start_server(Hundred).await;
    let client = client();

    let requests: Vec<_> = (0..20)
        .map(|i| {
            let req = client.get(server.url(&format!("/item/{i}"))).send();
            tokio::spawn(async move { req.await.unwrap().bytes().await.unwrap() })
        })
        .collect();
    for req in requests {
        assert_eq!(req.await.unwrap().len(), 100);
    }

    let lines = server.log.lines();
    assert_eq!(lines.len(), 20);
    let mut paths: Vec<String> = lines
        .iter()
        .map(|line| {
            let f = fields(line);
            assert_eq!(f.len(), 10, "{line}");
            assert_eq!(f[4], "200");
            f[3].to_string()
        })
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 20);
}

#[tokio::test]
async fn echo_hijacks_connection() {
    let server = start_server(DemoHandler).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(
            b"GET /echo HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: echo\r\nUser-Agent: raw\r\n\r\n",
        )
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");

    stream.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");

    drop(stream);
    for _ in 0..50 {
        if !server.log.lines().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let lines = server.log.lines();
    assert_eq!(lines.len(), 1);
    let f = fields(&lines[0]);
    assert_eq!(f[3], "\"/echo\"");
    assert_eq!(f[4], "101");
    assert_eq!(f[8], "\"raw\"");
}
