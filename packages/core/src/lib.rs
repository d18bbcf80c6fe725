//! Core domain types for the image cache pipeline.
//!
//! This crate contains shared types used across all packages:
//! - CacheJob and JobStatus for mirroring work items
//! - QueueConfig and QueueStats for the job queue
//! - CacheEvent for lifecycle notifications
//! - CacheRecord and the collaborator traits (origin, CDN host, record store)

mod error;
mod events;
mod job;
mod ports;
mod queue;
mod record;

pub use error::{HostError, JobError, QueueError, SourceError, StoreError};
pub use events::CacheEvent;
pub use job::{CacheJob, CacheKey, CacheRequest, ImageKind, JobId, JobStage, JobStatus, MediaType};
pub use ports::{CacheRecordStore, ImageHost, ImageSource, PortFuture};
pub use queue::{QueueConfig, QueueStats};
pub use record::{CacheRecord, ImageLookup, SourceImage, TransformOptions, UploadedImage};
