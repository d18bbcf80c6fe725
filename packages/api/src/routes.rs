//! HTTP routes for job submission, status queries and image delivery.

use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use cache_core::{
    CacheJob, CacheKey, CacheRecord, CacheRequest, ImageKind, ImageLookup, JobId, JobStatus,
    MediaType, QueueStats,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::broadcaster::RealtimeStats;
use crate::error::{ApiError, ApiResult};

const DEFAULT_MAX_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: JobId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub delivery_url: Option<String>,
}

impl From<CacheJob> for JobStatusResponse {
    fn from(job: CacheJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            error: job.error,
            attempts: job.attempts,
            delivery_url: job.delivery_url,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub realtime: RealtimeStats,
    /// Retained finished jobs.
    pub processed: u64,
    /// Percentage of `processed` that completed; absent before any finished.
    pub success_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupParams {
    pub source: String,
    pub max_age_secs: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedImage {
    pub image_kind: ImageKind,
    #[serde(flatten)]
    pub record: CacheRecord,
}

#[derive(Serialize)]
pub struct SubjectImages {
    pub images: Vec<CachedImage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResponse {
    pub invalidated: bool,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<CacheRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let job_id = state.queue.enqueue(request).await?;
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id =
        JobId::parse(&id).map_err(|e| ApiError::BadRequest(format!("invalid job id {id:?}: {e}")))?;
    let job = state
        .queue
        .get_status(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(job.into()))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let queue = state.queue.get_queue_stats().await?;
    let realtime = state.broadcaster.get_stats().await;
    Ok(Json(StatsResponse {
        processed: queue.processed(),
        success_rate: queue.success_rate(),
        queue,
        realtime,
    }))
}

/// Serve a fresh cached record, or start mirroring the image.
pub async fn lookup_image(
    State(state): State<AppState>,
    Path((media_type, media_id, image_kind)): Path<(String, u64, String)>,
    Query(params): Query<LookupParams>,
) -> ApiResult<Response> {
    let key = parse_key(&media_type, media_id, &image_kind)?;
    let max_age = Duration::from_secs(params.max_age_secs.unwrap_or(DEFAULT_MAX_AGE_SECS));
    let request = CacheRequest {
        key,
        source_url: params.source,
    };

    let response = match state.queue.resolve(request, max_age).await? {
        ImageLookup::Cached { record } => (StatusCode::OK, Json(record)).into_response(),
        ImageLookup::Pending { job_id } => {
            (StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })).into_response()
        }
    };
    Ok(response)
}

/// Every cached image of one title or person, whatever its freshness.
pub async fn list_images(
    State(state): State<AppState>,
    Path((media_type, media_id)): Path<(String, u64)>,
) -> ApiResult<Json<SubjectImages>> {
    let media_type: MediaType = media_type.parse().map_err(ApiError::BadRequest)?;
    let images = state
        .records
        .list_for_subject(media_type, media_id)
        .await?
        .into_iter()
        .map(|(image_kind, record)| CachedImage { image_kind, record })
        .collect();
    Ok(Json(SubjectImages { images }))
}

pub async fn invalidate_image(
    State(state): State<AppState>,
    Path((media_type, media_id, image_kind)): Path<(String, u64, String)>,
) -> ApiResult<Json<InvalidateResponse>> {
    let key = parse_key(&media_type, media_id, &image_kind)?;
    let invalidated = state.queue.invalidate(&key).await?;
    Ok(Json(InvalidateResponse { invalidated }))
}

/// Deliver an uploaded original. The transform segment is left to the
/// fronting image CDN.
pub async fn serve_image(
    State(state): State<AppState>,
    Path((transform, public_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    tracing::debug!(%transform, %public_id, "Serving cached image");
    let (bytes, manifest): (Bytes, _) = state.host.read_image(&public_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, manifest.content_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        bytes,
    ))
}

fn parse_key(media_type: &str, media_id: u64, image_kind: &str) -> ApiResult<CacheKey> {
    let media_type: MediaType = media_type.parse().map_err(ApiError::BadRequest)?;
    let image_kind: ImageKind = image_kind.parse().map_err(ApiError::BadRequest)?;
    Ok(CacheKey::new(media_type, media_id, image_kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_keys() {
        let key = parse_key("tv", 1399, "backdrop").unwrap();
        assert_eq!(key, CacheKey::new(MediaType::Tv, 1399, ImageKind::Backdrop));

        let err = parse_key("book", 1, "poster").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = parse_key("movie", 1, "banner").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
