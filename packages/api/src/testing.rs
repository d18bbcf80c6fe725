//! Test doubles shared by the inline test modules.

use std::sync::Arc;

use actors::{CachePipeline, CacheQueue};
use bytes::Bytes;
use cache_core::{ImageSource, PortFuture, QueueConfig, SourceError, SourceImage};
use db::{CacheRecordRepository, DbConfig};
use storage::{ObjectImageHost, Storage, StorageConfig};

/// Origin that serves the same small JPEG for every path.
pub struct StaticSource;

impl StaticSource {
    pub fn ok() -> Self {
        StaticSource
    }
}

impl ImageSource for StaticSource {
    fn fetch<'a>(&'a self, source_url: &'a str) -> PortFuture<'a, Result<SourceImage, SourceError>> {
        Box::pin(async move {
            Ok(SourceImage {
                source_url: source_url.to_string(),
                bytes: Bytes::from_static(b"\xff\xd8\xff\xe0jpeg"),
                content_type: Some("image/jpeg".into()),
            })
        })
    }
}

/// A running queue over in-memory storage and database.
pub async fn start_queue(source: StaticSource) -> CacheQueue {
    let storage = Storage::new(StorageConfig::memory()).await.unwrap();
    let host = ObjectImageHost::new(storage, "https://cdn.test");
    let db = db::connect(&DbConfig::memory()).await.unwrap();

    let pipeline = CachePipeline::new(
        Arc::new(source),
        Arc::new(host),
        Arc::new(CacheRecordRepository::new(db)),
    );
    let config = QueueConfig {
        retry_backoff_ms: 0,
        ..QueueConfig::default()
    };
    let (queue, _handle) = CacheQueue::start(config, pipeline).await.unwrap();
    queue
}
