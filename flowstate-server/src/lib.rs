//! # flowstate-server
//!
//! HTTP gateway for flowstate.
//!
//! This crate provides:
//! - The workflow service that sequences repository reads, validation and saves
//! - REST routing with a JSON response envelope
//! - HTTP connection handling on hyper
//! - Prometheus metrics on a separate endpoint
//! - YAML and environment configuration

pub mod config;
pub mod dto;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod service;

pub use config::{Config, ConfigError, MetricsConfig, NetworkConfig, StorageBackend, StorageConfig};
pub use dto::ApiResponse;
pub use error::ServiceError;
pub use handler::{ApiHandler, Route};
pub use metrics::{run_metrics_server, Metrics};
pub use server::{Server, ServerConfig};
pub use service::WorkflowService;
