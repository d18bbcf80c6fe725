//! SurrealDB integration for the image cache.
//!
//! This crate provides the database connection and the repository that
//! backs the cache record store.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::CacheRecordRepository;
pub use schema::init_schema;
