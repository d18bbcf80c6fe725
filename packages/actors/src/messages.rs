//! Message types for actor communication.

use cache_core::{CacheJob, CacheRecord, CacheRequest, JobError, JobId, JobStage, QueueError, QueueStats};
use ractor::{ActorId, RpcReplyPort};

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Enqueue a request, coalescing with an in-flight job for the same key.
    Enqueue {
        request: CacheRequest,
        reply: RpcReplyPort<Result<JobId, QueueError>>,
    },

    /// Get a job snapshot by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<CacheJob>>,
    },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// A worker moved to the next pipeline stage.
    JobProgress { job_id: JobId, stage: JobStage },

    /// A worker finished an attempt.
    JobFinished {
        job_id: JobId,
        worker: ActorId,
        outcome: Result<CacheRecord, JobError>,
    },

    /// Retry backoff elapsed; put the job back in line.
    Requeue { job_id: JobId },

    /// Stop admitting new jobs. Replies with the stats at that moment.
    Drain { reply: RpcReplyPort<QueueStats> },

    /// Stop the queue and its workers.
    Shutdown,

    /// Periodic tick for housekeeping.
    Tick,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one attempt of a job.
    ProcessJob { job: Box<CacheJob> },
}
