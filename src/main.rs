//! flowstate - workflow state store
//!
//! An HTTP service that stores validated workflow definitions and moves
//! instances through them one checked action at a time.

use flowstate_server::{
    run_metrics_server, Config, Metrics, Server, ServerConfig, StorageBackend, WorkflowService,
};
use flowstate_storage::{FileRepository, FileRepositoryConfig, InMemoryRepository, Repository};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if FLOWSTATE_CONFIG is set, then env overrides)
    let config_path = std::env::var("FLOWSTATE_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting flowstate server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let repository: Arc<dyn Repository> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("  Storage: memory (records are lost on exit)");
            Arc::new(InMemoryRepository::new())
        }
        StorageBackend::File => {
            tracing::info!(
                "  Storage: file at {} (sync_writes={})",
                config.storage.data_dir.display(),
                config.storage.sync_writes
            );
            let repo_config = FileRepositoryConfig::new(&config.storage.data_dir)
                .with_sync_writes(config.storage.sync_writes);
            match FileRepository::open(repo_config) {
                Ok(repo) => Arc::new(repo),
                Err(e) => {
                    tracing::error!("Failed to open data directory: {}", e);
                    return Err(e.into());
                }
            }
        }
    };

    let metrics = if config.metrics.enabled {
        tracing::info!("  Metrics: enabled on {}", config.metrics.bind_addr);
        Some(Arc::new(Metrics::new()?))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let mut service = WorkflowService::new(repository);
    if let Some(ref metrics) = metrics {
        service = service.with_metrics(metrics.clone());
    }

    let server_config = ServerConfig::new(config.network.bind_addr)
        .with_max_connections(config.network.max_connections);
    let server = Arc::new(Server::new(server_config, Arc::new(service)));

    let metrics_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let shutdown = server.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        })
    });

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    tracing::info!("Server stopped");
    Ok(())
}
