#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cache_core::{
    CacheJob, CacheKey, CacheRecord, CacheRecordStore, HostError, ImageHost, ImageSource, JobId,
    PortFuture, QueueConfig, SourceError, SourceImage, StoreError, TransformOptions, UploadedImage,
};
use tokio::time::Instant;

use actors::{CachePipeline, CacheQueue};

/// Origin double: fails the first `failures` calls, optionally panics on the
/// first one, and records peak concurrency.
#[derive(Default)]
pub struct FakeSource {
    pub failures: u32,
    pub panic_on_first: bool,
    pub delay: Duration,
    pub calls: AtomicU32,
    current: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl FakeSource {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn always_failing() -> Self {
        Self {
            failures: u32::MAX,
            ..Self::default()
        }
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Panics on the first fetch, then behaves.
    pub fn panicking() -> Self {
        Self {
            panic_on_first: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ImageSource for FakeSource {
    fn fetch<'a>(&'a self, source_url: &'a str) -> PortFuture<'a, Result<SourceImage, SourceError>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && call == 0 {
                panic!("origin client crashed");
            }

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if call < self.failures {
                return Err(SourceError::Status {
                    status: 503,
                    url: source_url.to_string(),
                });
            }

            Ok(SourceImage {
                source_url: source_url.to_string(),
                bytes: Bytes::from_static(b"\xff\xd8\xff\xe0jpeg"),
                content_type: Some("image/jpeg".into()),
            })
        })
    }
}

/// CDN double keeping uploaded public ids.
#[derive(Default)]
pub struct FakeHost {
    pub assets: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn has_asset(&self, public_id: &str) -> bool {
        self.assets
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == public_id)
    }
}

impl ImageHost for FakeHost {
    fn upload<'a>(
        &'a self,
        _image: SourceImage,
        public_id: &'a str,
        transform: &'a TransformOptions,
    ) -> PortFuture<'a, Result<UploadedImage, HostError>> {
        Box::pin(async move {
            self.assets.lock().unwrap().push(public_id.to_string());
            Ok(UploadedImage {
                delivery_url: format!("https://cdn.test/{}/{}", transform.to_segment(), public_id),
                public_id: public_id.to_string(),
            })
        })
    }

    fn delete<'a>(&'a self, public_id: &'a str) -> PortFuture<'a, Result<(), HostError>> {
        Box::pin(async move {
            self.assets.lock().unwrap().retain(|id| id != public_id);
            Ok(())
        })
    }
}

/// Record store double. Writes take `put_delay` before landing.
#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<CacheKey, CacheRecord>>,
    pub put_delay: Duration,
}

impl MemoryStore {
    pub fn slow(put_delay: Duration) -> Self {
        Self {
            put_delay,
            ..Self::default()
        }
    }

    pub fn record(&self, key: &CacheKey) -> Option<CacheRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }
}

impl CacheRecordStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a CacheKey) -> PortFuture<'a, Result<Option<CacheRecord>, StoreError>> {
        Box::pin(async move { Ok(self.record(key)) })
    }

    fn put<'a>(&'a self, key: &'a CacheKey, record: &'a CacheRecord) -> PortFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            tokio::time::sleep(self.put_delay).await;
            self.records.lock().unwrap().insert(*key, record.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> PortFuture<'a, Result<Option<CacheRecord>, StoreError>> {
        Box::pin(async move { Ok(self.records.lock().unwrap().remove(key)) })
    }
}

pub struct Harness {
    pub queue: CacheQueue,
    pub handle: tokio::task::JoinHandle<()>,
    pub source: Arc<FakeSource>,
    pub host: Arc<FakeHost>,
    pub store: Arc<MemoryStore>,
    pub config: QueueConfig,
}

pub fn test_config() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        max_attempts: 3,
        retry_backoff_ms: 0,
        ..QueueConfig::default()
    }
}

pub async fn start(config: QueueConfig, source: FakeSource) -> Harness {
    start_with_store(config, source, MemoryStore::default()).await
}

pub async fn start_with_store(config: QueueConfig, source: FakeSource, store: MemoryStore) -> Harness {
    let source = Arc::new(source);
    let host = Arc::new(FakeHost::default());
    let store = Arc::new(store);

    let pipeline = CachePipeline::new(source.clone(), host.clone(), store.clone());
    let (queue, handle) = CacheQueue::start(config.clone(), pipeline)
        .await
        .expect("queue should start");

    Harness {
        queue,
        handle,
        source,
        host,
        store,
        config,
    }
}

impl Harness {
    /// Poll until the job reaches a terminal state.
    pub async fn wait_terminal(&self, job_id: JobId) -> CacheJob {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = self
                .queue
                .get_status(job_id)
                .await
                .expect("status query")
                .expect("job should be retained");
            if job.is_terminal(self.config.max_attempts) {
                return job;
            }
            assert!(Instant::now() < deadline, "job {job_id} did not finish in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
