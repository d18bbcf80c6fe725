//! Collaborator traits consumed by the pipeline.
//!
//! Implementations live in `db` (record store), `storage` (CDN host) and
//! `actors` (HTTP origin). Methods return boxed futures so the traits stay
//! object safe behind `Arc<dyn _>`.

use std::future::Future;
use std::pin::Pin;

use crate::{CacheKey, CacheRecord, HostError, SourceError, SourceImage, StoreError, TransformOptions, UploadedImage};

/// Future type returned by collaborator methods.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote origin serving original images.
pub trait ImageSource: Send + Sync + 'static {
    /// Fetch the image at `source_url` (a path relative to the origin, or absolute).
    fn fetch<'a>(&'a self, source_url: &'a str) -> PortFuture<'a, Result<SourceImage, SourceError>>;
}

/// CDN image host.
pub trait ImageHost: Send + Sync + 'static {
    /// Store `image` under `public_id`, replacing any previous asset.
    fn upload<'a>(
        &'a self,
        image: SourceImage,
        public_id: &'a str,
        transform: &'a TransformOptions,
    ) -> PortFuture<'a, Result<UploadedImage, HostError>>;

    /// Remove an asset. Deleting a missing asset is not an error.
    fn delete<'a>(&'a self, public_id: &'a str) -> PortFuture<'a, Result<(), HostError>>;
}

/// Persistent mapping from cache key to mirrored-image metadata.
pub trait CacheRecordStore: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a CacheKey) -> PortFuture<'a, Result<Option<CacheRecord>, StoreError>>;

    fn put<'a>(&'a self, key: &'a CacheKey, record: &'a CacheRecord) -> PortFuture<'a, Result<(), StoreError>>;

    /// Remove a record, returning it if it existed.
    fn delete<'a>(&'a self, key: &'a CacheKey) -> PortFuture<'a, Result<Option<CacheRecord>, StoreError>>;
}
