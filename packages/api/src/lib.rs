//! HTTP and WebSocket surface for the image cache.
//!
//! This crate contains:
//! - The realtime broadcaster and its WebSocket session handler
//! - Routes for job submission, status queries and image delivery
//! - Service configuration and system bootstrap

mod broadcaster;
mod config;
mod error;
mod frames;
mod init;
mod routes;
mod ws;

#[cfg(test)]
mod testing;

use actors::CacheQueue;
use axum::Router;
use axum::routing::{get, post};
use db::CacheRecordRepository;
use storage::ObjectImageHost;

pub use broadcaster::{
    Broadcaster, BroadcasterConfig, CLOSE_GOING_AWAY, ConnectionId, Outbound, RealtimeStats,
};
pub use config::{ConfigError, ServiceConfig};
pub use error::{ApiError, ApiResult};
pub use frames::{ClientFrame, CompletedPayload, FailedPayload, JobUpdate, ServerFrame, StatusPayload};
pub use init::{CacheSystem, init_cache_system};

// Re-export core types for convenience
pub use cache_core::{
    CacheEvent, CacheJob, CacheKey, CacheRequest, ImageKind, JobId, JobStatus, MediaType,
    QueueConfig, QueueStats,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub queue: CacheQueue,
    pub broadcaster: Broadcaster,
    pub host: ObjectImageHost,
    pub records: CacheRecordRepository,
}

/// Build the router with the WebSocket endpoint mounted at `ws_path`.
pub fn router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route(ws_path, get(ws::ws_handler))
        .route("/api/cache/jobs", post(routes::enqueue_job))
        .route("/api/cache/jobs/{id}", get(routes::get_job))
        .route("/api/cache/stats", get(routes::stats))
        .route(
            "/api/cache/images/{media_type}/{media_id}",
            get(routes::list_images),
        )
        .route(
            "/api/cache/images/{media_type}/{media_id}/{image_kind}",
            get(routes::lookup_image).delete(routes::invalidate_image),
        )
        .route("/cdn/{transform}/{*public_id}", get(routes::serve_image))
        .with_state(state)
}
