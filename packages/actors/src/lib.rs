//! Actor system for the image cache queue.
//!
//! # Architecture
//!
//! - `QueueActor` - Owns every job: dedup, FIFO admission, retries, events
//! - `WorkerActor` - One per concurrency slot, runs the `CachePipeline`
//! - `CacheQueue` - Cloneable handle used by routes and the broadcaster
//!
//! # Usage
//!
//! ```ignore
//! use actors::{CachePipeline, CacheQueue};
//!
//! let pipeline = CachePipeline::new(source, host, store);
//! let (queue, handle) = CacheQueue::start(QueueConfig::default(), pipeline).await?;
//!
//! let job_id = queue.enqueue(request).await?;
//! let mut events = queue.subscribe();
//! ```

mod messages;
mod pipeline;
mod queue_actor;
mod service;
mod source;
mod worker_actor;

pub use messages::{QueueMessage, WorkerMessage};
pub use pipeline::CachePipeline;
pub use queue_actor::{QueueActor, QueueArgs};
pub use service::CacheQueue;
pub use source::{DEFAULT_ORIGIN_BASE_URL, HttpImageSource};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
