//! # flowstate-storage
//!
//! Storage layer for flowstate.
//!
//! This crate provides:
//! - The `Repository` abstraction the service layer persists through
//! - An in-memory repository
//! - A write-through, file-backed repository
//! - Per-instance locks for read-validate-save critical sections

pub mod error;
pub mod file;
pub mod locks;
pub mod memory;
pub mod repository;

pub use error::StorageError;
pub use file::{FileRepository, FileRepositoryConfig};
pub use locks::{InstanceGuard, InstanceLocks};
pub use memory::InMemoryRepository;
pub use repository::Repository;
