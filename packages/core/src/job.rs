//! Job domain types for image mirroring work items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of catalog subject an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
    /// Cast and crew, used for profile images.
    Person,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
            MediaType::Person => "person",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            "person" => Ok(MediaType::Person),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// Which of a subject's images a job mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Poster,
    Backdrop,
    Profile,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Poster => "poster",
            ImageKind::Backdrop => "backdrop",
            ImageKind::Profile => "profile",
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poster" => Ok(ImageKind::Poster),
            "backdrop" => Ok(ImageKind::Backdrop),
            "profile" => Ok(ImageKind::Profile),
            other => Err(format!("unknown image kind: {other}")),
        }
    }
}

/// Dedup key: at most one in-flight job exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub media_type: MediaType,
    pub media_id: u64,
    pub image_kind: ImageKind,
}

impl CacheKey {
    pub fn new(media_type: MediaType, media_id: u64, image_kind: ImageKind) -> Self {
        Self {
            media_type,
            media_id,
            image_kind,
        }
    }

    /// Stable CDN identifier for this key. Re-uploads overwrite the same asset.
    pub fn public_id(&self) -> String {
        format!("{}/{}/{}", self.media_type, self.media_id, self.image_kind)
    }

    /// Record identifier usable as a database key.
    pub fn record_id(&self) -> String {
        format!("{}_{}_{}", self.media_type, self.media_id, self.image_kind)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.media_type, self.media_id, self.image_kind)
    }
}

/// A request to mirror one remote image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRequest {
    #[serde(flatten)]
    pub key: CacheKey,
    pub source_url: String,
}

impl CacheRequest {
    pub fn new(
        media_type: MediaType,
        media_id: u64,
        image_kind: ImageKind,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            key: CacheKey::new(media_type, media_id, image_kind),
            source_url: source_url.into(),
        }
    }

    /// Reject requests that could never succeed.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.source_url.trim();
        if url.is_empty() {
            return Err("source url must not be empty".into());
        }
        if url.chars().any(char::is_whitespace) {
            return Err(format!("source url contains whitespace: {url:?}"));
        }
        if self.key.media_id == 0 {
            return Err("media id must be positive".into());
        }
        Ok(())
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a free worker slot (or for its retry backoff to elapse).
    #[default]
    Queued,
    /// Held by a worker.
    Active,
    /// Image mirrored and record persisted.
    Completed,
    /// An attempt failed. Terminal only once retries are exhausted.
    Failed,
}

impl JobStatus {
    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a job in this status still holds its dedup key.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Active)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of a running job, reported as its progress text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Fetching,
    Uploading,
    Saving,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Fetching => "fetching",
            JobStage::Uploading => "uploading",
            JobStage::Saving => "saving",
        }
    }
}

/// A job mirrors one remote image into the CDN cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheJob {
    /// Unique identifier for this job.
    pub id: JobId,
    pub media_type: MediaType,
    pub media_id: u64,
    pub image_kind: ImageKind,
    /// Remote image path or absolute URL.
    pub source_url: String,
    pub status: JobStatus,
    /// Human-readable stage while active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Last failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// CDN delivery URL once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_url: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CacheJob {
    /// Create a new queued job for a request.
    pub fn new(request: CacheRequest) -> Self {
        let CacheRequest { key, source_url } = request;
        Self {
            id: JobId::new(),
            media_type: key.media_type,
            media_id: key.media_id,
            image_kind: key.image_kind,
            source_url,
            status: JobStatus::Queued,
            progress: None,
            error: None,
            attempts: 0,
            delivery_url: None,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.media_type, self.media_id, self.image_kind)
    }

    /// Whether no further transitions will happen, given the retry limit.
    pub fn is_terminal(&self, max_attempts: u32) -> bool {
        match self.status {
            JobStatus::Completed => true,
            JobStatus::Failed => self.attempts >= max_attempts,
            JobStatus::Queued | JobStatus::Active => false,
        }
    }

    /// Time spent since the current attempt started, in milliseconds.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}
