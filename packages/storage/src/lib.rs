//! Object storage backing the CDN image host.
//!
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! `Storage` is a small wrapper around `object_store`; `ObjectImageHost`
//! implements the pipeline's `ImageHost` on top of it.

mod config;
mod host;
mod store;

pub use config::{S3Config, StorageBackendConfig, StorageConfig, StorageKind};
pub use host::{ImageManifest, ObjectImageHost};
pub use store::Storage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
