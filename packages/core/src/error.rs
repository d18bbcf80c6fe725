//! Error taxonomy shared by the pipeline crates.

/// Origin fetch failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("origin returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("origin request failed: {0}")]
    Transport(String),
}

/// CDN host failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("image host unavailable: {0}")]
    Unavailable(String),
}

/// Cache record store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record store error: {0}")]
    Backend(String),

    #[error("corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Why a single job attempt failed. Callers only ever see the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("upload failed: {0}")]
    Upload(#[from] HostError),

    #[error("persist failed: {0}")]
    Persist(#[from] StoreError),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("worker stopped: {0}")]
    WorkerLost(String),
}

/// Errors returned by the queue handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("invalid cache request: {0}")]
    InvalidRequest(String),

    #[error("queue is full ({0} jobs waiting)")]
    QueueFull(usize),

    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),
}
