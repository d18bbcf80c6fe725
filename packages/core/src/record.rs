//! Cached image metadata and the values exchanged with collaborators.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ImageKind, JobId};

/// What the record store keeps for a mirrored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub source_url: String,
    pub delivery_url: String,
    pub public_id: String,
    pub cached_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Whether the record was cached within `max_age` of `now`.
    pub fn is_fresh(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.cached_at <= max_age
    }
}

/// Original image bytes fetched from the origin.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub source_url: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl SourceImage {
    /// File extension guessed from the content type, falling back to the URL.
    pub fn extension(&self) -> &'static str {
        let from_type = self.content_type.as_deref().and_then(|ct| {
            match ct.split(';').next().map(str::trim) {
                Some("image/png") => Some("png"),
                Some("image/webp") => Some("webp"),
                Some("image/svg+xml") => Some("svg"),
                Some("image/jpeg") | Some("image/jpg") => Some("jpg"),
                _ => None,
            }
        });
        if let Some(ext) = from_type {
            return ext;
        }
        let path = self.source_url.split(['?', '#']).next().unwrap_or_default();
        match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
            Some("png") => "png",
            Some("webp") => "webp",
            Some("svg") => "svg",
            _ => "jpg",
        }
    }
}

/// Delivery-time transformation applied by the CDN host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOptions {
    /// Maximum delivered width in pixels; never upscaled.
    pub max_width: u32,
    pub quality: String,
    pub format: String,
}

impl TransformOptions {
    /// Presets per image kind. Posters are delivered narrower than backdrops.
    pub fn for_kind(kind: ImageKind) -> Self {
        let max_width = match kind {
            ImageKind::Poster => 500,
            ImageKind::Backdrop => 1280,
            ImageKind::Profile => 300,
        };
        Self {
            max_width,
            quality: "auto".into(),
            format: "auto".into(),
        }
    }

    /// URL segment in the `w_500,c_limit,q_auto,f_auto` style.
    pub fn to_segment(&self) -> String {
        format!(
            "w_{},c_limit,q_{},f_{}",
            self.max_width, self.quality, self.format
        )
    }
}

/// Result of a CDN upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub delivery_url: String,
    pub public_id: String,
}

/// Answer to "give me the image for this key".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ImageLookup {
    /// A fresh record exists.
    Cached { record: CacheRecord },
    /// A job is mirroring the image.
    Pending {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
}
