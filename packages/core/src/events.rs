//! Lifecycle events emitted by the job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheJob, CacheKey, JobId, JobStatus};

/// Events emitted by the cache queue for observers.
///
/// Each variant carries the job id and its dedup key so an observer can
/// rebuild current state without querying the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A new job was created.
    JobEnqueued { job: CacheJob, timestamp: DateTime<Utc> },
    /// A job moved between statuses, or its progress text changed.
    JobStatusChanged {
        job_id: JobId,
        key: CacheKey,
        old_status: JobStatus,
        new_status: JobStatus,
        progress: Option<String>,
        error: Option<String>,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job mirrored its image and persisted the record.
    JobCompleted {
        job_id: JobId,
        key: CacheKey,
        delivery_url: String,
        public_id: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job exhausted its attempts.
    JobFailed {
        job_id: JobId,
        key: CacheKey,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEvent::JobEnqueued { timestamp, .. } => *timestamp,
            CacheEvent::JobStatusChanged { timestamp, .. } => *timestamp,
            CacheEvent::JobCompleted { timestamp, .. } => *timestamp,
            CacheEvent::JobFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event.
    pub fn job_id(&self) -> JobId {
        match self {
            CacheEvent::JobEnqueued { job, .. } => job.id,
            CacheEvent::JobStatusChanged { job_id, .. } => *job_id,
            CacheEvent::JobCompleted { job_id, .. } => *job_id,
            CacheEvent::JobFailed { job_id, .. } => *job_id,
        }
    }

    /// Get the dedup key of the job this event is about.
    pub fn key(&self) -> CacheKey {
        match self {
            CacheEvent::JobEnqueued { job, .. } => job.key(),
            CacheEvent::JobStatusChanged { key, .. } => *key,
            CacheEvent::JobCompleted { key, .. } => *key,
            CacheEvent::JobFailed { key, .. } => *key,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            CacheEvent::JobEnqueued { job, .. } => {
                format!("Job {} enqueued for {}", job.id, job.key())
            }
            CacheEvent::JobStatusChanged {
                job_id,
                old_status,
                new_status,
                progress,
                ..
            } => match progress {
                Some(progress) if old_status == new_status => {
                    format!("Job {} {}: {}", job_id, new_status, progress)
                }
                _ => format!("Job {} {} -> {}", job_id, old_status, new_status),
            },
            CacheEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            CacheEvent::JobFailed {
                job_id,
                error,
                attempts,
                ..
            } => format!("Job {} failed after {} attempts: {}", job_id, attempts, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheRequest, ImageKind, MediaType};

    #[test]
    fn events_expose_job_identity() {
        let job = CacheJob::new(CacheRequest::new(MediaType::Movie, 550, ImageKind::Poster, "/a.jpg"));
        let enqueued = CacheEvent::JobEnqueued {
            job: job.clone(),
            timestamp: Utc::now(),
        };
        assert_eq!(enqueued.job_id(), job.id);
        assert_eq!(enqueued.key(), job.key());

        let progress = CacheEvent::JobStatusChanged {
            job_id: job.id,
            key: job.key(),
            old_status: JobStatus::Active,
            new_status: JobStatus::Active,
            progress: Some("uploading".into()),
            error: None,
            attempts: 1,
            timestamp: Utc::now(),
        };
        assert!(progress.description().ends_with("active: uploading"));
    }

    #[test]
    fn tagged_by_event_name() {
        let event = CacheEvent::JobFailed {
            job_id: JobId::new(),
            key: CacheKey::new(MediaType::Tv, 1, ImageKind::Backdrop),
            error: "fetch failed".into(),
            attempts: 3,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "job_failed");
        assert_eq!(value["key"]["mediaType"], "tv");
    }
}
