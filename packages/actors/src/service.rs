//! Client handle for the cache queue.
//!
//! `CacheQueue` is what routes and the broadcaster hold. It wraps the queue
//! actor's reference and the event channel, and is cheap to clone.

use std::sync::Arc;
use std::time::Duration;

use cache_core::{
    CacheEvent, CacheJob, CacheKey, CacheRequest, ImageLookup, JobId, QueueConfig, QueueError,
    QueueStats,
};
use chrono::Utc;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, MessagingErr};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::messages::QueueMessage;
use crate::pipeline::CachePipeline;
use crate::queue_actor::{QueueActor, QueueArgs};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 1024;
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct CacheQueue {
    actor: ActorRef<QueueMessage>,
    event_tx: broadcast::Sender<CacheEvent>,
    pipeline: Arc<CachePipeline>,
}

impl CacheQueue {
    /// Spawn the queue actor and its workers.
    pub async fn start(
        config: QueueConfig,
        pipeline: CachePipeline,
    ) -> Result<(Self, JoinHandle<()>), ractor::SpawnErr> {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let pipeline = Arc::new(pipeline);

        let args = QueueArgs {
            config,
            pipeline: pipeline.clone(),
            event_tx: event_tx.clone(),
        };
        let (actor, handle) = Actor::spawn(None, QueueActor, args).await?;

        Ok((
            Self {
                actor,
                event_tx,
                pipeline,
            },
            handle,
        ))
    }

    /// Enqueue a request. Returns the existing job's id while one is in flight
    /// for the same key.
    pub async fn enqueue(&self, request: CacheRequest) -> Result<JobId, QueueError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| QueueMessage::Enqueue { request, reply },
            Some(CALL_TIMEOUT),
        )
        .await;
        unwrap_call(result)?
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<Option<CacheJob>, QueueError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| QueueMessage::GetJob { job_id, reply },
            Some(CALL_TIMEOUT),
        )
        .await;
        unwrap_call(result)
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats, QueueError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| QueueMessage::GetStats { reply },
            Some(CALL_TIMEOUT),
        )
        .await;
        unwrap_call(result)
    }

    /// Receive every lifecycle event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    /// Return the stored image when it is fresh, otherwise make sure a job is
    /// mirroring it.
    ///
    /// A record is served only if it was cached from the same source URL
    /// within `max_age`.
    pub async fn resolve(
        &self,
        request: CacheRequest,
        max_age: Duration,
    ) -> Result<ImageLookup, QueueError> {
        request.validate().map_err(QueueError::InvalidRequest)?;

        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        if let Some(record) = self.pipeline.lookup(&request.key).await?
            && record.source_url == request.source_url
            && record.is_fresh(max_age, Utc::now())
        {
            return Ok(ImageLookup::Cached { record });
        }

        let job_id = self.enqueue(request).await?;
        Ok(ImageLookup::Pending { job_id })
    }

    /// Remove the stored record and CDN asset for a key.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, QueueError> {
        self.pipeline.invalidate(key).await
    }

    /// Stop accepting jobs, give in-flight work up to `grace` to finish, then
    /// stop the queue and its workers.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;

        let drained = ractor::rpc::call(
            &self.actor,
            |reply| QueueMessage::Drain { reply },
            Some(CALL_TIMEOUT),
        )
        .await;
        let mut stats = match unwrap_call(drained) {
            Ok(stats) => stats,
            Err(_) => return,
        };

        while stats.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
            match self.get_queue_stats().await {
                Ok(next) => stats = next,
                Err(_) => return,
            }
        }

        if stats.in_flight() > 0 {
            tracing::warn!(
                queued = stats.queued,
                active = stats.active,
                "Grace period elapsed with jobs still in flight"
            );
        }

        let _ = self.actor.send_message(QueueMessage::Shutdown);
    }
}

fn unwrap_call<T>(
    result: Result<CallResult<T>, MessagingErr<QueueMessage>>,
) -> Result<T, QueueError> {
    match result {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(QueueError::Unavailable("queue call timed out".into())),
        Ok(CallResult::SenderError) => Err(QueueError::Unavailable("queue dropped the reply".into())),
        Err(_) => Err(QueueError::ShuttingDown),
    }
}
