//! HTTP server implementation.

use crate::handler::{ApiHandler, ApiReply};
use crate::metrics::Metrics;
use crate::service::WorkflowService;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// HTTP server for the workflow API.
pub struct Server {
    config: ServerConfig,
    handler: Arc<ApiHandler>,
    metrics: Option<Arc<Metrics>>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, service: Arc<WorkflowService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let metrics = service.metrics().cloned();
        Self {
            config,
            handler: Arc::new(ApiHandler::new(service)),
            metrics,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on http://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let metrics = self.metrics.clone();
                            let max_body = self.config.max_body_bytes;
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::debug!("Client connected: {}", addr);

                                let io = TokioIo::new(tcp_stream);
                                let service = {
                                    let stats = stats.clone();
                                    service_fn(move |req| {
                                        let handler = handler.clone();
                                        let stats = stats.clone();
                                        async move { serve_request(req, handler, stats, max_body).await }
                                    })
                                };

                                let conn = http1::Builder::new().serve_connection(io, service);
                                tokio::pin!(conn);

                                let result = tokio::select! {
                                    result = conn.as_mut() => result,
                                    _ = conn_shutdown.recv() => {
                                        conn.as_mut().graceful_shutdown();
                                        conn.as_mut().await
                                    }
                                };

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::debug!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver that fires when the server shuts down.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

async fn serve_request(
    req: Request<Incoming>,
    handler: Arc<ApiHandler>,
    stats: Arc<ServerStats>,
    max_body: usize,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    stats.requests_total.fetch_add(1, Ordering::Relaxed);

    let (parts, body) = req.into_parts();
    let reply = match Limited::new(body, max_body).collect().await {
        Ok(collected) => {
            handler
                .handle(
                    &parts.method,
                    parts.uri.path(),
                    parts.uri.query(),
                    collected.to_bytes(),
                )
                .await
        }
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => ApiReply::payload_too_large(),
        Err(e) => {
            tracing::debug!("Failed to read request body: {}", e);
            ApiReply::bad_request("failed to read request body")
        }
    };

    tracing::debug!("{} {} -> {}", parts.method, parts.uri.path(), reply.status);

    Response::builder()
        .status(reply.status)
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Full::new(reply.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_storage::InMemoryRepository;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_server(config: ServerConfig) -> Arc<Server> {
        let service = WorkflowService::new(Arc::new(InMemoryRepository::new()));
        Arc::new(Server::new(config, Arc::new(service)))
    }

    async fn start(server: &Arc<Server>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = server.clone();
        let handle = tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });
        (addr, handle)
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_server_not_running_before_serve() {
        let server = test_server(ServerConfig::default());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_health_over_http() {
        let server = test_server(ServerConfig::default());
        let (addr, handle) = start(&server).await;

        let response = raw_request(
            addr,
            "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("application/json"));
        assert!(response.contains("\"status\":\"Healthy\""));

        server.shutdown();
        handle.await.unwrap();
        assert!(!server.is_running());
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_create_definition_over_http() {
        let server = test_server(ServerConfig::default());
        let (addr, handle) = start(&server).await;

        let body = r#"{"name":"t","states":[{"id":"a","name":"A","isInitial":true},{"id":"b","name":"B","isFinal":true}],"actions":[{"id":"go","name":"Go","fromStates":"a","toState":"b"}]}"#;
        let request = format!(
            "POST /api/WorkflowDefinitions HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let response = raw_request(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("\"success\":true"));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let config = ServerConfig {
            max_body_bytes: 16,
            ..ServerConfig::default()
        };
        let server = test_server(config);
        let (addr, handle) = start(&server).await;

        let body = "x".repeat(64);
        let request = format!(
            "POST /api/WorkflowDefinitions HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let response = raw_request(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 413"), "{}", response);

        server.shutdown();
        handle.await.unwrap();
    }
}
