//! WebSocket wire frames.
//!
//! Server frames look like `{"type": "cache-status", "data": {...}}`; the
//! only client frame is `{"type": "ping"}`.

use cache_core::{CacheEvent, CacheKey, JobId, JobStatus, QueueStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    CacheStatus(StatusPayload),
    CacheCompleted(CompletedPayload),
    CacheFailed(FailedPayload),
    Pong,
}

/// Either a stats snapshot (sent on connect) or a single job update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobUpdate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: JobId,
    #[serde(flatten)]
    pub key: CacheKey,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    pub job_id: JobId,
    #[serde(flatten)]
    pub key: CacheKey,
    pub delivery_url: String,
    pub public_id: String,
    pub attempts: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    pub job_id: JobId,
    #[serde(flatten)]
    pub key: CacheKey,
    pub error: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl ServerFrame {
    pub fn snapshot(stats: QueueStats) -> Self {
        ServerFrame::CacheStatus(StatusPayload {
            stats: Some(stats),
            job: None,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&CacheEvent> for ServerFrame {
    fn from(event: &CacheEvent) -> Self {
        match event {
            CacheEvent::JobEnqueued { job, timestamp } => ServerFrame::CacheStatus(StatusPayload {
                stats: None,
                job: Some(JobUpdate {
                    job_id: job.id,
                    key: job.key(),
                    status: job.status,
                    progress: job.progress.clone(),
                    error: job.error.clone(),
                    attempts: job.attempts,
                    timestamp: *timestamp,
                }),
            }),
            CacheEvent::JobStatusChanged {
                job_id,
                key,
                new_status,
                progress,
                error,
                attempts,
                timestamp,
                ..
            } => ServerFrame::CacheStatus(StatusPayload {
                stats: None,
                job: Some(JobUpdate {
                    job_id: *job_id,
                    key: *key,
                    status: *new_status,
                    progress: progress.clone(),
                    error: error.clone(),
                    attempts: *attempts,
                    timestamp: *timestamp,
                }),
            }),
            CacheEvent::JobCompleted {
                job_id,
                key,
                delivery_url,
                public_id,
                attempts,
                duration_ms,
                timestamp,
            } => ServerFrame::CacheCompleted(CompletedPayload {
                job_id: *job_id,
                key: *key,
                delivery_url: delivery_url.clone(),
                public_id: public_id.clone(),
                attempts: *attempts,
                duration_ms: *duration_ms,
                timestamp: *timestamp,
            }),
            CacheEvent::JobFailed {
                job_id,
                key,
                error,
                attempts,
                timestamp,
            } => ServerFrame::CacheFailed(FailedPayload {
                job_id: *job_id,
                key: *key,
                error: error.clone(),
                attempts: *attempts,
                timestamp: *timestamp,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Ping,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
