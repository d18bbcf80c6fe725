//! Server initialization for the image cache system.

use std::sync::Arc;
use std::time::Duration;

use actors::{CachePipeline, CacheQueue, HttpImageSource};
use cache_core::ImageSource;
use db::CacheRecordRepository;
use storage::{ObjectImageHost, Storage};
use tokio::task::JoinHandle;

use crate::AppState;
use crate::broadcaster::Broadcaster;
use crate::config::ServiceConfig;

/// The running queue, broadcaster, CDN host and record store.
pub struct CacheSystem {
    pub queue: CacheQueue,
    pub broadcaster: Broadcaster,
    pub host: ObjectImageHost,
    pub records: CacheRecordRepository,
    queue_handle: JoinHandle<()>,
}

/// Initialize the image cache system with the HTTP origin client.
///
/// This should be called once at server startup before handling requests.
pub async fn init_cache_system(
    config: &ServiceConfig,
) -> Result<CacheSystem, Box<dyn std::error::Error>> {
    let source = HttpImageSource::new(config.origin_base_url.clone(), config.origin_timeout)?;
    CacheSystem::build(config, Arc::new(source)).await
}

impl CacheSystem {
    /// Connect the backends, start the queue and the broadcaster.
    pub async fn build(
        config: &ServiceConfig,
        source: Arc<dyn ImageSource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::info!("Initializing image cache system...");

        let db = db::connect(&config.db).await?;
        let records = CacheRecordRepository::new(db);

        let storage = Storage::new(config.storage.clone()).await?;
        tracing::info!("Object storage backend: {}", storage.kind().as_str());
        let host = ObjectImageHost::new(storage, config.storage.public_base_url.clone());

        let pipeline = CachePipeline::new(source, Arc::new(host.clone()), Arc::new(records.clone()));
        let (queue, queue_handle) = CacheQueue::start(config.queue.clone(), pipeline).await?;

        let broadcaster = Broadcaster::new(queue.clone(), config.broadcaster.clone());
        broadcaster.start().await?;

        tracing::info!(
            concurrency = config.queue.concurrency,
            max_attempts = config.queue.max_attempts,
            "Image cache system initialized"
        );

        Ok(Self {
            queue,
            broadcaster,
            host,
            records,
            queue_handle,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            queue: self.queue.clone(),
            broadcaster: self.broadcaster.clone(),
            host: self.host.clone(),
            records: self.records.clone(),
        }
    }

    /// Close realtime clients, drain the queue for at most `grace`, and wait
    /// for the queue actor to stop.
    pub async fn shutdown(self, grace: Duration) {
        tracing::info!("Shutting down image cache system");
        self.broadcaster.shutdown().await;
        self.queue.shutdown(grace).await;
        if let Err(e) = self.queue_handle.await {
            tracing::warn!("Queue actor ended abnormally: {}", e);
        }
        tracing::info!("Image cache system stopped");
    }
}
