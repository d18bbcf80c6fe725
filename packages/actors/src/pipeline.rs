//! One caching run: fetch from the origin, upload to the CDN, persist the record.

use std::sync::Arc;
use std::time::Duration;

use cache_core::{
    CacheJob, CacheKey, CacheRecord, CacheRecordStore, ImageHost, ImageSource, JobError, JobStage,
    QueueError, StoreError, TransformOptions,
};
use chrono::Utc;

/// The collaborators a job needs, shared by every worker.
#[derive(Clone)]
pub struct CachePipeline {
    source: Arc<dyn ImageSource>,
    host: Arc<dyn ImageHost>,
    store: Arc<dyn CacheRecordStore>,
}

impl CachePipeline {
    pub fn new(
        source: Arc<dyn ImageSource>,
        host: Arc<dyn ImageHost>,
        store: Arc<dyn CacheRecordStore>,
    ) -> Self {
        Self {
            source,
            host,
            store,
        }
    }

    /// Run a job to completion.
    ///
    /// `timeout` bounds fetch and upload together. The record is written only
    /// after both succeeded, and once started the write is never abandoned, so
    /// a stored record always belongs to a successful attempt.
    /// `on_stage` is called before each step.
    pub async fn run(
        &self,
        job: &CacheJob,
        timeout: Duration,
        mut on_stage: impl FnMut(JobStage) + Send,
    ) -> Result<CacheRecord, JobError> {
        let key = job.key();

        let transfer = async {
            on_stage(JobStage::Fetching);
            let image = self.source.fetch(&job.source_url).await?;
            tracing::debug!(%key, bytes = image.bytes.len(), "Fetched source image");

            on_stage(JobStage::Uploading);
            let transform = TransformOptions::for_kind(key.image_kind);
            let uploaded = self
                .host
                .upload(image, &key.public_id(), &transform)
                .await?;
            Ok::<_, JobError>(uploaded)
        };
        let uploaded = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| JobError::Timeout(timeout.as_secs()))??;

        on_stage(JobStage::Saving);
        let record = CacheRecord {
            source_url: job.source_url.clone(),
            delivery_url: uploaded.delivery_url,
            public_id: uploaded.public_id,
            cached_at: Utc::now(),
        };
        self.store.put(&key, &record).await?;

        Ok(record)
    }

    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StoreError> {
        self.store.get(key).await
    }

    /// Drop the stored record and its CDN asset. Returns whether a record existed.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, QueueError> {
        let Some(record) = self.store.delete(key).await? else {
            return Ok(false);
        };
        self.host.delete(&record.public_id).await?;
        tracing::info!(%key, public_id = %record.public_id, "Invalidated cached image");
        Ok(true)
    }
}
