use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct KvRow {
    pub k: String,
    pub v: String,
    // unix seconds
    pub updated_at: i64,
    pub expires_at: i64,
}

impl KvRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.updated_at, 0).single()
    }
}
