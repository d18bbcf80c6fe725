use chrono::{DateTime, Utc};

use cache_core::CacheRecord;
use db::{CacheRecordRepository, DbConfig, DbError};

pub async fn setup_repo() -> Result<CacheRecordRepository, DbError> {
    let db = db::connect(&DbConfig::memory()).await?;
    Ok(CacheRecordRepository::new(db))
}

pub fn record(public_id: &str, cached_at: DateTime<Utc>) -> CacheRecord {
    CacheRecord {
        source_url: format!("/{public_id}.jpg"),
        delivery_url: format!("https://cdn.example.com/w_500,c_limit,q_auto,f_auto/{public_id}"),
        public_id: public_id.to_string(),
        cached_at,
    }
}
