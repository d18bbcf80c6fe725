//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Definitions are idempotent, so this runs on every connect.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(CACHE_RECORD_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Cache record table: one row per (media type, media id, image kind).
const CACHE_RECORD_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS cache_record SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS media_type ON cache_record TYPE string;
DEFINE FIELD IF NOT EXISTS media_id ON cache_record TYPE int;
DEFINE FIELD IF NOT EXISTS image_kind ON cache_record TYPE string;
DEFINE FIELD IF NOT EXISTS source_url ON cache_record TYPE string;
DEFINE FIELD IF NOT EXISTS delivery_url ON cache_record TYPE string;
DEFINE FIELD IF NOT EXISTS public_id ON cache_record TYPE string;
DEFINE FIELD IF NOT EXISTS cached_at ON cache_record TYPE datetime;

-- Lookups by subject and staleness sweeps
DEFINE INDEX IF NOT EXISTS cache_record_subject ON cache_record FIELDS media_type, media_id;
DEFINE INDEX IF NOT EXISTS cache_record_cached_at ON cache_record FIELDS cached_at;
"#;
