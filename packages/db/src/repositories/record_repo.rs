//! Cache record repository.

use cache_core::{CacheKey, CacheRecord, CacheRecordStore, ImageKind, MediaType, PortFuture, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Datetime, Thing};

use crate::{Database, DbError};

const TABLE: &str = "cache_record";

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct RecordRow {
    #[serde(default)]
    #[allow(dead_code)]
    id: Option<Thing>,
    source_url: String,
    delivery_url: String,
    public_id: String,
    cached_at: DateTime<Utc>,
}

impl From<RecordRow> for CacheRecord {
    fn from(row: RecordRow) -> Self {
        CacheRecord {
            source_url: row.source_url,
            delivery_url: row.delivery_url,
            public_id: row.public_id,
            cached_at: row.cached_at,
        }
    }
}

/// Struct for writes - carries the key fields and a native datetime.
#[derive(Debug, Clone, Serialize)]
struct RecordWrite {
    media_type: &'static str,
    media_id: u64,
    image_kind: &'static str,
    source_url: String,
    delivery_url: String,
    public_id: String,
    cached_at: Datetime,
}

impl RecordWrite {
    fn new(key: &CacheKey, record: &CacheRecord) -> Self {
        Self {
            media_type: key.media_type.as_str(),
            media_id: key.media_id,
            image_kind: key.image_kind.as_str(),
            source_url: record.source_url.clone(),
            delivery_url: record.delivery_url.clone(),
            public_id: record.public_id.clone(),
            cached_at: Datetime::from(record.cached_at),
        }
    }
}

/// SurrealDB-backed cache record store.
#[derive(Clone)]
pub struct CacheRecordRepository {
    db: Database,
}

impl CacheRecordRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get the record for a key.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>, DbError> {
        let row: Option<RecordRow> = self.db.select((TABLE, key.record_id())).await?;
        Ok(row.map(CacheRecord::from))
    }

    /// Insert or replace the record for a key.
    pub async fn put(&self, key: &CacheKey, record: &CacheRecord) -> Result<CacheRecord, DbError> {
        let row: Option<RecordRow> = self
            .db
            .upsert((TABLE, key.record_id()))
            .content(RecordWrite::new(key, record))
            .await?;

        row.map(CacheRecord::from)
            .ok_or_else(|| DbError::Query(format!("Failed to write cache record {}", key)))
    }

    /// Delete the record for a key, returning it if it existed.
    pub async fn delete(&self, key: &CacheKey) -> Result<Option<CacheRecord>, DbError> {
        let row: Option<RecordRow> = self.db.delete((TABLE, key.record_id())).await?;
        Ok(row.map(CacheRecord::from))
    }

    /// All cached images of one subject, ordered by image kind.
    pub async fn list_for_subject(
        &self,
        media_type: MediaType,
        media_id: u64,
    ) -> Result<Vec<(ImageKind, CacheRecord)>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT image_kind, source_url, delivery_url, public_id, cached_at
                FROM cache_record
                WHERE media_type = $media_type AND media_id = $media_id
                ORDER BY image_kind ASC
                "#,
            )
            .bind(("media_type", media_type.as_str()))
            .bind(("media_id", media_id))
            .await?;

        let rows: Vec<SubjectRow> = result.take(0)?;
        rows.into_iter().map(SubjectRow::into_entry).collect()
    }
}

/// Row shape for subject listings. The kind is stored as a plain string.
#[derive(Debug, Deserialize)]
struct SubjectRow {
    image_kind: String,
    source_url: String,
    delivery_url: String,
    public_id: String,
    cached_at: DateTime<Utc>,
}

impl SubjectRow {
    fn into_entry(self) -> Result<(ImageKind, CacheRecord), DbError> {
        let image_kind = self.image_kind.parse().map_err(DbError::Serialization)?;
        let record = CacheRecord {
            source_url: self.source_url,
            delivery_url: self.delivery_url,
            public_id: self.public_id,
            cached_at: self.cached_at,
        };
        Ok((image_kind, record))
    }
}

fn store_error(err: DbError) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl CacheRecordStore for CacheRecordRepository {
    fn get<'a>(&'a self, key: &'a CacheKey) -> PortFuture<'a, Result<Option<CacheRecord>, StoreError>> {
        Box::pin(async move { CacheRecordRepository::get(self, key).await.map_err(store_error) })
    }

    fn put<'a>(&'a self, key: &'a CacheKey, record: &'a CacheRecord) -> PortFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            CacheRecordRepository::put(self, key, record)
                .await
                .map(|_| ())
                .map_err(store_error)
        })
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> PortFuture<'a, Result<Option<CacheRecord>, StoreError>> {
        Box::pin(async move { CacheRecordRepository::delete(self, key).await.map_err(store_error) })
    }
}
