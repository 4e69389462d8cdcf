//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use request_logger::http::{Handler, HttpServer, HyperSink};
use request_logger::{MemorySink, ServerConfig, Shutdown};
use tokio::net::TcpListener;

/// A running server whose access records are captured in memory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub log: Arc<MemorySink>,
    shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Serve `handler` on an ephemeral local port.
pub async fn start_server<H>(handler: H) -> TestServer
where
    H: Handler<HyperSink>,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(MemorySink::new());

    let mut config = ServerConfig::default();
    config.listener.bind_address = addr.to_string();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, handler, log.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer { addr, log, shutdown }
}

/// HTTP client that never pools or proxies.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Split an access record into its space-separated fields.
#[allow(dead_code)]
pub fn fields(line: &str) -> Vec<&str> {
    line.split(' ').collect()
}
