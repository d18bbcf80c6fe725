//! CDN image host over the object store.
//!
//! Originals are stored under `images/<public_id>` with a JSON manifest next
//! to them under `manifests/<public_id>.json`. Delivery URLs embed the
//! transform segment so the fronting image CDN can resize on the fly:
//! `<public_base_url>/<transform>/<public_id>`.

use bytes::Bytes;
use cache_core::{HostError, ImageHost, PortFuture, SourceImage, TransformOptions, UploadedImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Storage, StorageError};

/// Metadata stored next to each uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub public_id: String,
    pub source_url: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub transform: TransformOptions,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ObjectImageHost {
    storage: Storage,
    public_base_url: String,
}

impl ObjectImageHost {
    pub fn new(storage: Storage, public_base_url: impl Into<String>) -> Self {
        Self {
            storage,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn image_key(public_id: &str) -> String {
        format!("images/{public_id}")
    }

    fn manifest_key(public_id: &str) -> String {
        format!("manifests/{public_id}.json")
    }

    pub fn delivery_url(&self, public_id: &str, transform: &TransformOptions) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url,
            transform.to_segment(),
            public_id
        )
    }

    pub async fn upload_image(
        &self,
        image: SourceImage,
        public_id: &str,
        transform: &TransformOptions,
    ) -> Result<UploadedImage, StorageError> {
        if image.bytes.is_empty() {
            return Err(StorageError::InvalidImage(format!(
                "empty body from {}",
                image.source_url
            )));
        }

        let content_type = image
            .content_type
            .clone()
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or_else(|| format!("image/{}", mime_subtype(image.extension())));

        let manifest = ImageManifest {
            public_id: public_id.to_string(),
            source_url: image.source_url.clone(),
            content_type,
            size_bytes: image.bytes.len(),
            transform: transform.clone(),
            uploaded_at: Utc::now(),
        };

        self.storage
            .put_bytes(&Self::image_key(public_id), image.bytes)
            .await?;
        self.storage
            .put_json(&Self::manifest_key(public_id), &manifest)
            .await?;

        tracing::debug!(
            public_id,
            size = manifest.size_bytes,
            backend = self.storage.kind().as_str(),
            "Stored image"
        );

        Ok(UploadedImage {
            delivery_url: self.delivery_url(public_id, transform),
            public_id: public_id.to_string(),
        })
    }

    /// Read back an uploaded original and its manifest.
    pub async fn read_image(&self, public_id: &str) -> Result<(Bytes, ImageManifest), StorageError> {
        let manifest: ImageManifest = self.storage.get_json(&Self::manifest_key(public_id)).await?;
        let bytes = self.storage.get_bytes(&Self::image_key(public_id)).await?;
        Ok((bytes, manifest))
    }

    pub async fn delete_image(&self, public_id: &str) -> Result<(), StorageError> {
        self.storage.delete(&Self::image_key(public_id)).await?;
        self.storage.delete(&Self::manifest_key(public_id)).await?;
        Ok(())
    }
}

fn mime_subtype(extension: &str) -> &str {
    match extension {
        "jpg" => "jpeg",
        "svg" => "svg+xml",
        other => other,
    }
}

fn host_error(err: StorageError) -> HostError {
    match err {
        StorageError::InvalidImage(_) | StorageError::InvalidKey(_) => {
            HostError::Rejected(err.to_string())
        }
        other => HostError::Unavailable(other.to_string()),
    }
}

impl ImageHost for ObjectImageHost {
    fn upload<'a>(
        &'a self,
        image: SourceImage,
        public_id: &'a str,
        transform: &'a TransformOptions,
    ) -> PortFuture<'a, Result<UploadedImage, HostError>> {
        Box::pin(async move {
            self.upload_image(image, public_id, transform)
                .await
                .map_err(host_error)
        })
    }

    fn delete<'a>(&'a self, public_id: &'a str) -> PortFuture<'a, Result<(), HostError>> {
        Box::pin(async move { self.delete_image(public_id).await.map_err(host_error) })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::StorageConfig;
    use cache_core::ImageKind;

    async fn host() -> Result<ObjectImageHost, StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        Ok(ObjectImageHost::new(storage, "https://cdn.example.com/"))
    }

    fn image(bytes: &'static [u8]) -> SourceImage {
        SourceImage {
            source_url: "/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg".into(),
            bytes: Bytes::from_static(bytes),
            content_type: Some("image/jpeg".into()),
        }
    }

    #[tokio::test]
    async fn upload_returns_transformed_delivery_url() -> Result<(), StorageError> {
        let host = host().await?;
        let transform = TransformOptions::for_kind(ImageKind::Poster);

        let uploaded = host
            .upload_image(image(b"\xff\xd8jpeg"), "movie/550/poster", &transform)
            .await?;

        assert_eq!(uploaded.public_id, "movie/550/poster");
        assert_eq!(
            uploaded.delivery_url,
            "https://cdn.example.com/w_500,c_limit,q_auto,f_auto/movie/550/poster"
        );

        let (bytes, manifest) = host.read_image("movie/550/poster").await?;
        assert_eq!(bytes, Bytes::from_static(b"\xff\xd8jpeg"));
        assert_eq!(manifest.content_type, "image/jpeg");
        assert_eq!(manifest.transform.max_width, 500);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_image_and_is_idempotent() -> Result<(), StorageError> {
        let host = host().await?;
        let transform = TransformOptions::for_kind(ImageKind::Backdrop);
        host.upload_image(image(b"data"), "tv/1399/backdrop", &transform)
            .await?;

        host.delete_image("tv/1399/backdrop").await?;
        assert!(matches!(
            host.read_image("tv/1399/backdrop").await,
            Err(StorageError::NotFound(_))
        ));
        host.delete_image("tv/1399/backdrop").await?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_body_is_rejected() -> Result<(), StorageError> {
        let host = host().await?;
        let transform = TransformOptions::for_kind(ImageKind::Profile);
        let result = ImageHost::upload(&host, image(b""), "person/1/profile", &transform).await;
        assert!(matches!(result, Err(HostError::Rejected(_))));
        Ok(())
    }
}
